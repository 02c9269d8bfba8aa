//! A single log frame lifted to a typed record.

use serde::{Deserialize, Serialize};

/// One parsed Xray log line identifying a `(name, ip, node, inbound)`
/// tuple at a moment in time.
///
/// Produced by a [`crate`]-external `LogFrameParser` collaborator
/// (`name`, `ip`, `inbound`, `accepted`) and stamped with `node` by the
/// log stream subscriber. Immutable after creation; `UserObservation`
/// derives `Clone` + structural equality rather than any identity beyond
/// its field values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserObservation {
    /// The panel username this connection belongs to.
    pub name: String,
    /// Source IP of the connection.
    pub ip: String,
    /// Name of the node the connection was observed on. Filled in by the
    /// log stream subscriber, not the parser.
    pub node: String,
    /// Xray inbound tag the connection came in through.
    pub inbound: String,
    /// Whether Xray reported this connection as accepted, when available.
    pub accepted: Option<bool>,
}

impl UserObservation {
    /// Returns `true` if `self` and `other` share `(name, ip)` — the key
    /// the active-users store and the debouncer key off.
    pub fn same_user_ip(&self, other: &UserObservation) -> bool {
        self.name == other.name && self.ip == other.ip
    }
}
