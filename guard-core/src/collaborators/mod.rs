//! The out-of-scope external interfaces the core depends on.
//!
//! Each trait here is a contract, not an implementation: the panel-specific
//! log parsers for non-primary panel types, the notification/chat-bot
//! delivery channel, persistent storage for excepted IPs and the local
//! limits table, and the ban transport to individual nodes are all
//! "specified only by the interface the core uses" per the scope note.
//! This module ships minimal reference implementations so the crate
//! compiles and is testable standalone; a hosting binary is expected to
//! substitute real ones.

pub mod reference;

use async_trait::async_trait;
use guard_types::{Node, UserLimit, UserObservation};

/// Parses a single raw log frame into a [`UserObservation`].
///
/// Implementations populate `name`, `ip`, `inbound`, and optionally
/// `accepted`; the returned observation's `node` field is ignored and
/// overwritten by the log stream subscriber with the node the frame was
/// read from. Returns `None` for lines that aren't user-connection
/// events — not every log line is one, and that's not an error.
pub trait LogFrameParser: Send + Sync {
    /// Attempts to parse `frame` into a [`UserObservation`].
    fn parse_log_to_user(&self, frame: &str) -> Option<UserObservation>;
}

/// An action attached to a notification, e.g. an "Unban IP" reply button.
#[derive(Debug, Clone)]
pub struct NotifyAction {
    /// User-facing label for the action.
    pub label: String,
    /// Opaque data round-tripped back to the delivery channel if the
    /// action is invoked (e.g. the banned IP).
    pub callback_data: String,
}

/// Best-effort, asynchronous delivery of operator-facing notifications.
///
/// Delivery failures are logged by the caller and never affect
/// enforcement — this trait's methods return `()`, not `Result`, by
/// design: there is nothing a caller could usefully do with an error
/// here beyond logging it, which implementations must do themselves.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Sends a plain-text notification.
    async fn notify(&self, message: &str);

    /// Sends a notification with a single reply action.
    async fn notify_with_action(&self, message: &str, action: NotifyAction);
}

/// Issues a ban for a single `(name, ip)` pair on one node.
///
/// Idempotence is not required: the check service guarantees at-most-one
/// ban per `(name, ip)` per violation episode by removing the
/// observation from the active-users store in the same step it schedules
/// the ban.
#[async_trait]
pub trait BanTransport: Send + Sync {
    /// Bans `user` on `node`. Errors are logged by the caller and do not
    /// block bans on other nodes.
    async fn ban_user(&self, node: &Node, user: &UserObservation) -> eyre::Result<()>;
}

/// Read-only access to state the collaborator persists: excepted IPs and
/// (in local mode) the per-user limits table.
pub trait PersistentStore: Send + Sync {
    /// Returns `true` if `ip` is configured to be ignored by enforcement.
    fn is_excepted_ip(&self, ip: &str) -> bool;

    /// Returns the durable local-mode limit for `name`, if one is
    /// configured. The local-mode resolver falls back to
    /// `UserLimit::new(name, DEFAULT_LIMIT)` when this returns `None`.
    fn local_limit(&self, name: &str) -> Option<UserLimit>;
}

/// A [`NotificationSink`] that only logs; useful for tests and for
/// running without a configured delivery channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(&self, message: &str) {
        tracing::info!(target: "notification", "{message}");
    }

    async fn notify_with_action(&self, message: &str, action: NotifyAction) {
        tracing::info!(
            target: "notification",
            action.label = %action.label,
            action.callback_data = %action.callback_data,
            "{message}"
        );
    }
}

/// An in-memory [`PersistentStore`] backed by plain collections; suitable
/// for local-mode limit resolution and for tests. Production deployments
/// are expected to back this with whatever durable store already holds
/// the excepted-IP and local-limits tables.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPersistentStore {
    excepted_ips: std::collections::HashSet<String>,
    local_limits: std::collections::HashMap<String, i64>,
}

impl InMemoryPersistentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an IP to the excepted set.
    pub fn except_ip(mut self, ip: impl Into<String>) -> Self {
        self.excepted_ips.insert(ip.into());
        self
    }

    /// Configures a durable per-user limit.
    pub fn with_limit(mut self, name: impl Into<String>, limit: i64) -> Self {
        self.local_limits.insert(name.into(), limit);
        self
    }
}

impl PersistentStore for InMemoryPersistentStore {
    fn is_excepted_ip(&self, ip: &str) -> bool {
        self.excepted_ips.contains(ip)
    }

    fn local_limit(&self, name: &str) -> Option<UserLimit> {
        self.local_limits
            .get(name)
            .map(|&limit| UserLimit::new(name, limit))
    }
}
