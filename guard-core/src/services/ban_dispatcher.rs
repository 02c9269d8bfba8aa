//! The Ban Dispatcher (C8): broadcasts a ban for one `(name, ip)` to
//! every node currently in the fleet, not just the node the offending
//! traffic was observed on — a roaming client must be blocked
//! everywhere.

use std::sync::Arc;

use guard_types::{Node, UserObservation};
use parking_lot::RwLock;

use crate::collaborators::BanTransport;
use crate::metrics::{METRICS_ID_BANS_ISSUED, METRICS_ID_BAN_RPC_FAILURES};

/// Shared, live view of the fleet's currently registered nodes.
///
/// Written only by the Fleet Supervisor; read by the Ban Dispatcher as a
/// point-in-time snapshot before fanning a ban out.
pub type NodeRegistry = Arc<RwLock<Vec<Node>>>;

/// Creates an empty, shareable node registry.
pub fn node_registry() -> NodeRegistry {
    Arc::new(RwLock::new(Vec::new()))
}

/// Bans `user` on every node currently in `registry`. A failure on one
/// node is logged and does not prevent the ban from being attempted on
/// the others.
#[tracing::instrument(skip_all, fields(name = %user.name, ip = %user.ip))]
pub async fn dispatch_ban(
    registry: &NodeRegistry,
    user: &UserObservation,
    transport: &dyn BanTransport,
) {
    let nodes = registry.read().clone();
    for node in &nodes {
        match transport.ban_user(node, user).await {
            Ok(()) => {
                metrics::counter!(METRICS_ID_BANS_ISSUED).increment(1);
                tracing::info!("banned {} ({}) on node {}", user.name, user.ip, node.name);
            }
            Err(err) => {
                metrics::counter!(METRICS_ID_BAN_RPC_FAILURES).increment(1);
                tracing::error!(
                    "failed to ban {} ({}) on node {}: {err}",
                    user.name,
                    user.ip,
                    node.name
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct RecordingTransport {
        calls: Mutex<Vec<(String, String)>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl BanTransport for RecordingTransport {
        async fn ban_user(&self, node: &Node, user: &UserObservation) -> eyre::Result<()> {
            self.calls
                .lock()
                .push((node.name.clone(), user.ip.clone()));
            if self.fail_for.as_deref() == Some(node.name.as_str()) {
                eyre::bail!("simulated failure on {}", node.name);
            }
            Ok(())
        }
    }

    fn node(name: &str) -> Node {
        Node {
            id: 1,
            name: name.to_string(),
            address: "10.0.0.1".to_string(),
            port: 62050,
            status: "healthy".to_string(),
            message: String::new(),
        }
    }

    fn obs(ip: &str) -> UserObservation {
        UserObservation {
            name: "alice".to_string(),
            ip: ip.to_string(),
            node: "n1".to_string(),
            inbound: "in1".to_string(),
            accepted: None,
        }
    }

    #[tokio::test]
    async fn failure_on_one_node_does_not_stop_the_rest() {
        let registry = node_registry();
        *registry.write() = vec![node("n1"), node("n2"), node("n3")];
        let transport = RecordingTransport {
            calls: Mutex::new(Vec::new()),
            fail_for: Some("n2".to_string()),
        };

        dispatch_ban(&registry, &obs("1.2.3.4"), &transport).await;

        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, ip)| ip == "1.2.3.4"));
    }
}
