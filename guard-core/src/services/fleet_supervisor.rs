//! The Fleet Supervisor (C7): periodically re-lists healthy nodes from
//! the panel and keeps one log-stream task alive per node.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use guard_types::Node;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{LogFrameParser, NotificationSink};
use crate::metrics::METRICS_ID_ACTIVE_STREAMS;
use crate::services::ban_dispatcher::NodeRegistry;
use crate::services::log_queue::LogQueueSender;
use crate::services::log_stream::run_log_stream;
use crate::services::panel_client::{PanelClient, SharedPanelSession};

/// Spacing between successive stream-task creations, to smooth the burst
/// of reconnects against the panel after a reload.
const TASK_SPAWN_SPACING: Duration = Duration::from_secs(3);

struct TrackedStream {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the live mapping of node name to running stream task, replacing
/// the module-level globals a single-process script would use.
pub struct FleetSupervisor {
    panel: Arc<PanelClient>,
    session: SharedPanelSession,
    sender: LogQueueSender,
    parser: Arc<dyn LogFrameParser>,
    notification: Arc<dyn NotificationSink>,
    nodes: NodeRegistry,
    custom_nodes: Vec<String>,
    reset_interval: Duration,
    tasks: HashMap<String, TrackedStream>,
}

impl FleetSupervisor {
    pub fn new(
        panel: Arc<PanelClient>,
        session: SharedPanelSession,
        sender: LogQueueSender,
        parser: Arc<dyn LogFrameParser>,
        notification: Arc<dyn NotificationSink>,
        nodes: NodeRegistry,
        custom_nodes: Vec<String>,
        reset_interval: Duration,
    ) -> Self {
        Self {
            panel,
            session,
            sender,
            parser,
            notification,
            nodes,
            custom_nodes,
            reset_interval,
            tasks: HashMap::new(),
        }
    }

    /// Performs one initial list-and-spawn cycle, then loops forever
    /// reloading every `reset_interval` until `shutdown` fires.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        self.reload().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.reset_interval) => {
                    self.notification.notify("Reloading node list from panel").await;
                    self.reload().await;
                }
                _ = shutdown.cancelled() => {
                    self.cancel_all();
                    return;
                }
            }
        }
    }

    async fn reload(&mut self) {
        let healthy = match self.panel.list_healthy_nodes(&self.session).await {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::error!("fleet supervisor failed to list nodes: {err}");
                return;
            }
        };

        let selected: Vec<Node> = if self.custom_nodes.is_empty() {
            healthy
        } else {
            healthy
                .into_iter()
                .filter(|n| self.custom_nodes.contains(&n.name))
                .collect()
        };

        self.cancel_all();
        *self.nodes.write() = selected.clone();

        for node in selected {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(run_log_stream(
                node.clone(),
                self.session.clone(),
                self.sender.clone(),
                self.parser.clone(),
                self.notification.clone(),
                cancel.clone(),
            ));
            self.tasks
                .insert(node.name.clone(), TrackedStream { cancel, handle });
            tokio::time::sleep(TASK_SPAWN_SPACING).await;
        }

        metrics::gauge!(METRICS_ID_ACTIVE_STREAMS).set(self.tasks.len() as f64);
    }

    fn cancel_all(&mut self) {
        for (_, tracked) in self.tasks.drain() {
            tracked.cancel.cancel();
            tracked.handle.abort();
        }
        metrics::gauge!(METRICS_ID_ACTIVE_STREAMS).set(0.0);
    }
}
