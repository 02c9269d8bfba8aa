#![deny(missing_docs)]
//! Per-user concurrent-IP enforcement for a fleet of Xray proxy nodes.
//!
//! Log lines from every node stream into a bounded queue; a dedicated
//! consumer thread turns them into per-user IP observations, applies a
//! debounced violation policy, and bans offending IPs fleet-wide.
//!
//! The main entry point is [`GuardServiceBuilder`], which wires
//! configuration and collaborator implementations (log-frame parsing,
//! notification delivery, ban transport, and persistent storage) into a
//! running pipeline and returns a [`tokio_util::sync::CancellationToken`]
//! the hosting binary can cancel for a graceful shutdown.

use std::sync::Arc;

use eyre::Context as _;
use guard_types::PanelSession;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod collaborators;
pub mod config;
pub mod metrics;
pub mod services;

use collaborators::{BanTransport, LogFrameParser, NotificationSink, PersistentStore};
use config::GuardConfig;
use services::ban_dispatcher::{self, NodeRegistry};
use services::check_service::{CheckService, DebouncePolicy};
use services::fleet_supervisor::FleetSupervisor;
use services::limit_resolver::{LimitResolver, LocalLimitResolver, PanelLimitResolver};
use services::log_queue::{log_queue, LogQueueReceiver};
use services::panel_client::{PanelClient, SharedPanelSession};

/// The collaborator implementations a hosting binary supplies to wire a
/// running enforcement pipeline. Each corresponds to one of the
/// out-of-scope external interfaces named in the external-interfaces
/// section of the configuration surface.
pub struct GuardCollaborators {
    /// Turns a raw log frame into a typed observation.
    pub parser: Arc<dyn LogFrameParser>,
    /// Delivers operator-facing notifications.
    pub notification: Arc<dyn NotificationSink>,
    /// Issues ban RPCs to individual nodes.
    pub ban_transport: Arc<dyn BanTransport>,
    /// Answers excepted-IP and local-limit queries.
    pub persistent_store: Arc<dyn PersistentStore>,
}

/// Initializes and wires a running enforcement pipeline.
///
/// [`GuardServiceBuilder::init`] performs the following steps:
/// 1. Builds the panel session and client (always, even in local mode,
///    since the fleet supervisor still needs the panel to list nodes).
/// 2. Constructs the limit resolver in local or panel mode per
///    `config.sync_with_panel`.
/// 3. Spawns the check service on its own OS thread.
/// 4. Spawns the fleet supervisor as a cooperative task.
pub struct GuardServiceBuilder {
    shutdown: CancellationToken,
    fleet_supervisor: JoinHandle<()>,
    check_service_thread: std::thread::JoinHandle<()>,
}

impl GuardServiceBuilder {
    /// Wires and starts the pipeline described by `config` and
    /// `collaborators`. Returns once every background task and thread has
    /// been spawned; the returned [`CancellationToken`] can be cancelled
    /// to stop the cooperative side (the check-service thread runs for
    /// process lifetime, per the concurrency model).
    pub async fn init(
        config: GuardConfig,
        collaborators: GuardCollaborators,
    ) -> eyre::Result<Self> {
        metrics::describe_metrics();

        // Pull out everything needed after `config.panel_password` is
        // consumed below — `SecretString` is deliberately not `Clone`.
        let services_limit = config.services_limit();
        let policy = DebouncePolicy {
            stl: config.stl,
            iul: config.iul,
            ban_last_user: config.ban_last_user,
        };
        let sync_with_panel = config.sync_with_panel;
        let default_limit = config.default_limit;
        let cache_ttl = config.cache_ttl;
        let panel_custom_nodes = config.panel_custom_nodes;
        let panel_node_reset = config.panel_node_reset;

        let session: SharedPanelSession = Arc::new(parking_lot::Mutex::new(PanelSession::new(
            config.panel_username,
            config.panel_password,
            config.panel_address,
        )));
        let panel = Arc::new(PanelClient::new(collaborators.notification.clone()));

        tracing::info!("authenticating against the panel..");
        panel
            .ensure_token(&session)
            .await
            .context("while performing initial panel authentication")?;

        let resolver: Arc<dyn LimitResolver> = if sync_with_panel {
            Arc::new(PanelLimitResolver::new(
                panel.clone(),
                session.clone(),
                services_limit,
                cache_ttl,
            ))
        } else {
            Arc::new(LocalLimitResolver::new(
                collaborators.persistent_store.clone(),
                default_limit,
            ))
        };

        let nodes: NodeRegistry = ban_dispatcher::node_registry();
        let (sender, receiver) = log_queue();

        let shutdown = CancellationToken::new();

        let runtime = tokio::runtime::Handle::current();
        let check_service_thread = spawn_check_service(
            resolver,
            collaborators.persistent_store.clone(),
            collaborators.ban_transport.clone(),
            collaborators.notification.clone(),
            nodes.clone(),
            policy,
            receiver,
            runtime,
        );

        let mut supervisor = FleetSupervisor::new(
            panel,
            session,
            sender,
            collaborators.parser,
            collaborators.notification,
            nodes,
            panel_custom_nodes,
            panel_node_reset,
        );
        let supervisor_shutdown = shutdown.clone();
        let fleet_supervisor =
            tokio::spawn(async move { supervisor.run(supervisor_shutdown).await });

        Ok(Self {
            shutdown,
            fleet_supervisor,
            check_service_thread,
        })
    }

    /// The token that cancels the cooperative side (fleet supervisor and
    /// its stream tasks) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Awaits the cooperative side's shutdown. The check-service thread
    /// is a daemon and is deliberately not joined here, matching the
    /// concurrency model: it has no cancellation protocol and runs for
    /// process lifetime.
    pub async fn join_cooperative_side(self) -> eyre::Result<()> {
        self.fleet_supervisor
            .await
            .context("fleet supervisor task panicked")
    }
}

fn spawn_check_service(
    resolver: Arc<dyn LimitResolver>,
    persistent: Arc<dyn PersistentStore>,
    ban_transport: Arc<dyn BanTransport>,
    notification: Arc<dyn NotificationSink>,
    nodes: NodeRegistry,
    policy: DebouncePolicy,
    receiver: LogQueueReceiver,
    runtime: tokio::runtime::Handle,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("check-service".to_string())
        .spawn(move || {
            let mut service =
                CheckService::new(resolver, persistent, ban_transport, notification, nodes, policy);
            service.run(&receiver, &runtime);
        })
        .expect("failed to spawn the check-service thread")
}
