//! The Active-Users Store (C5): an in-memory view of `name → active IPs`.
//!
//! Consulted only from the check service's dedicated consumer thread, so
//! this store takes no lock of its own — a parallel-consumer design
//! would need to serialize access per name, but observations are always
//! drained by a single thread here.

use guard_types::UserObservation;
use std::collections::HashMap;

/// Per-name, insertion-ordered list of observations.
///
/// Every arrival is an event, not a set insertion: duplicate `(name, ip)`
/// pairs are permitted and preserved in arrival order, so `get_users`
/// reflects the number of log lines admitted, not the number of distinct
/// IPs.
#[derive(Debug, Default)]
pub struct ActiveUsersStore {
    by_name: HashMap<String, Vec<UserObservation>>,
}

impl ActiveUsersStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `obs` to the list for its name.
    pub fn add_user(&mut self, obs: UserObservation) {
        self.by_name.entry(obs.name.clone()).or_default().push(obs);
    }

    /// Returns the observations for `name`, in arrival order.
    pub fn get_users(&self, name: &str) -> &[UserObservation] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the earliest arrival still present for `name`.
    pub fn get_user(&self, name: &str) -> Option<&UserObservation> {
        self.by_name.get(name).and_then(|v| v.first())
    }

    /// Returns the most recently added observation for `name`.
    pub fn get_last_user(&self, name: &str) -> Option<&UserObservation> {
        self.by_name.get(name).and_then(|v| v.last())
    }

    /// Removes the entry matching both `name` and `ip`, if present.
    pub fn delete_user(&mut self, name: &str, ip: &str) {
        if let Some(entries) = self.by_name.get_mut(name) {
            entries.retain(|obs| obs.ip != ip);
            if entries.is_empty() {
                self.by_name.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(name: &str, ip: &str) -> UserObservation {
        UserObservation {
            name: name.to_string(),
            ip: ip.to_string(),
            node: "n1".to_string(),
            inbound: "in1".to_string(),
            accepted: None,
        }
    }

    #[test]
    fn get_user_is_earliest_get_last_is_most_recent() {
        let mut store = ActiveUsersStore::new();
        store.add_user(obs("alice", "1.1.1.1"));
        store.add_user(obs("alice", "2.2.2.2"));
        store.add_user(obs("alice", "3.3.3.3"));

        assert_eq!(store.get_user("alice").unwrap().ip, "1.1.1.1");
        assert_eq!(store.get_last_user("alice").unwrap().ip, "3.3.3.3");
        assert_eq!(store.get_users("alice").len(), 3);
    }

    #[test]
    fn delete_user_removes_the_matching_ip_only() {
        let mut store = ActiveUsersStore::new();
        store.add_user(obs("alice", "1.1.1.1"));
        store.add_user(obs("alice", "2.2.2.2"));

        store.delete_user("alice", "1.1.1.1");

        let remaining = store.get_users("alice");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].ip, "2.2.2.2");
    }

    #[test]
    fn reobserving_an_ip_appends_a_new_arrival_without_reordering() {
        let mut store = ActiveUsersStore::new();
        store.add_user(obs("alice", "1.1.1.1"));
        store.add_user(obs("alice", "2.2.2.2"));
        store.add_user(obs("alice", "1.1.1.1"));

        assert_eq!(store.get_users("alice").len(), 3);
        assert_eq!(store.get_user("alice").unwrap().ip, "1.1.1.1");
        assert_eq!(store.get_last_user("alice").unwrap().ip, "1.1.1.1");
    }

    #[test]
    fn add_then_delete_round_trips_to_prior_state() {
        let mut store = ActiveUsersStore::new();
        store.add_user(obs("bob", "9.9.9.9"));
        assert_eq!(store.get_users("bob").len(), 1);

        store.add_user(obs("bob", "1.2.3.4"));
        store.delete_user("bob", "1.2.3.4");

        assert_eq!(store.get_users("bob").len(), 1);
        assert_eq!(store.get_users("bob")[0].ip, "9.9.9.9");
    }

    #[test]
    fn unknown_name_returns_empty_slice() {
        let store = ActiveUsersStore::new();
        assert!(store.get_users("nobody").is_empty());
        assert!(store.get_user("nobody").is_none());
        assert!(store.get_last_user("nobody").is_none());
    }
}
