//! The Check Service (C4): the violation detector.
//!
//! Runs on a dedicated OS thread that blocks on the log queue. All
//! mutable detector state (the active-users store, the debouncer's
//! repeated-violations list, the in-flight-ban IP set) is owned by this
//! thread alone, so none of it needs a lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use guard_types::UserObservation;
use tokio::runtime::Handle;

use crate::collaborators::{BanTransport, NotificationSink, NotifyAction, PersistentStore};
use crate::metrics::{
    METRICS_ID_DEBOUNCER_PURGES, METRICS_ID_LIMIT_RESOLUTION_FAILURES,
    METRICS_ID_OBSERVATIONS_ADMITTED,
};
use crate::services::active_users::ActiveUsersStore;
use crate::services::ban_dispatcher::{self, NodeRegistry};
use crate::services::limit_resolver::LimitResolver;
use crate::services::log_queue::LogQueueReceiver;

/// How long the worker thread waits for the limit resolver before giving
/// up and dropping the observation that triggered the lookup.
const LIMIT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Above this multiple of `stl` entries for a single name, the oldest
/// entries for that name are dropped from the debouncer's list. Keeps
/// worst-case memory proportional to `users x stl` as required, without
/// ever discarding the most recent (and therefore most relevant)
/// evidence.
const REPEATS_PER_NAME_HEADROOM: usize = 8;

/// Hysteresis thresholds and ban-target policy, sourced from
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct DebouncePolicy {
    /// "Seen-times limit": repeated over-limit observations required
    /// before a ban fires.
    pub stl: usize,
    /// "Imbalance unban level": tolerable asymmetry before a stale first
    /// entry is evicted instead of banned.
    pub iul: usize,
    /// Ban the most recently observed offending IP instead of the
    /// earliest-seen one.
    pub ban_last_user: bool,
}

/// The violation detector's owned, single-threaded state.
pub struct CheckService {
    active_users: ActiveUsersStore,
    repeated_out_of_limits: Vec<UserObservation>,
    in_process_ips: HashSet<String>,
    resolver: Arc<dyn LimitResolver>,
    persistent: Arc<dyn PersistentStore>,
    transport: Arc<dyn BanTransport>,
    notification: Arc<dyn NotificationSink>,
    nodes: NodeRegistry,
    policy: DebouncePolicy,
}

impl CheckService {
    pub fn new(
        resolver: Arc<dyn LimitResolver>,
        persistent: Arc<dyn PersistentStore>,
        transport: Arc<dyn BanTransport>,
        notification: Arc<dyn NotificationSink>,
        nodes: NodeRegistry,
        policy: DebouncePolicy,
    ) -> Self {
        Self {
            active_users: ActiveUsersStore::new(),
            repeated_out_of_limits: Vec::new(),
            in_process_ips: HashSet::new(),
            resolver,
            persistent,
            transport,
            notification,
            nodes,
            policy,
        }
    }

    /// Drains `queue` until every sender is dropped. Intended to be the
    /// entire body of the dedicated check-service thread; `runtime` is a
    /// handle into the cooperative side used to resolve limits (bounded
    /// wait) and to fire off ban/notification work (fire-and-forget).
    pub fn run(&mut self, queue: &LogQueueReceiver, runtime: &Handle) {
        while let Some(obs) = queue.take() {
            self.handle_observation(obs, runtime);
        }
        tracing::info!("check service stopping: log queue disconnected");
    }

    #[tracing::instrument(skip_all, fields(name = %obs.name, ip = %obs.ip))]
    fn handle_observation(&mut self, obs: UserObservation, runtime: &Handle) {
        // 1-2: resolve the limit with a bounded wait; drop on timeout/error.
        let limit = match runtime.block_on(tokio::time::timeout(
            LIMIT_RESOLUTION_TIMEOUT,
            self.resolver.resolve(&obs.name),
        )) {
            Ok(limit) => limit,
            Err(_elapsed) => {
                metrics::counter!(METRICS_ID_LIMIT_RESOLUTION_FAILURES).increment(1);
                tracing::warn!("limit resolution timed out for {}, dropping observation", obs.name);
                return;
            }
        };

        // 3: exemptions never get admitted at all.
        if limit.is_unenforced() || self.persistent.is_excepted_ip(&obs.ip) {
            return;
        }

        // 4: admit unconditionally once past exemptions.
        self.active_users.add_user(obs.clone());
        metrics::counter!(METRICS_ID_OBSERVATIONS_ADMITTED).increment(1);

        // 5: under the limit, nothing more to do.
        let users_len = self.active_users.get_users(&obs.name).len() as i64;
        if users_len <= limit.limit {
            return;
        }

        // 6: a ban for this exact IP is already in flight.
        if self.in_process_ips.contains(&obs.ip) {
            return;
        }

        // 7: the two observations the debounce decision is about.
        let Some(target_by_email) = self.active_users.get_user(&obs.name).cloned() else {
            return;
        };
        let Some(target_last) = self.active_users.get_last_user(&obs.name).cloned() else {
            return;
        };

        // 8: append and count repeated evidence.
        self.repeated_out_of_limits.push(obs);
        self.cap_repeats_for(&target_by_email.name);

        let rl_len = self.count_matching(&target_by_email);
        let rl_last_len = self.count_matching(&target_last);

        if rl_len < self.policy.stl || rl_last_len < self.policy.stl {
            let imbalance = rl_len.abs_diff(rl_last_len);
            if imbalance > self.policy.iul {
                self.purge_matching(&target_by_email, &target_last);
                self.active_users.delete_user(&target_by_email.name, &target_by_email.ip);
                metrics::counter!(METRICS_ID_DEBOUNCER_PURGES).increment(1);
            }
            return;
        }

        // 9: both crossed STL, ban.
        self.purge_matching(&target_by_email, &target_last);
        metrics::counter!(METRICS_ID_DEBOUNCER_PURGES).increment(1);
        self.in_process_ips.insert(target_by_email.ip.clone());

        let ban_target = if self.policy.ban_last_user {
            target_last.clone()
        } else {
            target_by_email.clone()
        };

        let nodes = self.nodes.clone();
        let transport = self.transport.clone();
        let notification = self.notification.clone();
        let in_process_ip = target_by_email.ip.clone();
        runtime.spawn(async move {
            ban_dispatcher::dispatch_ban(&nodes, &ban_target, transport.as_ref()).await;
            notification
                .notify_with_action(
                    &format!("Banned {} ({})", ban_target.name, ban_target.ip),
                    NotifyAction {
                        label: "Unban IP".to_string(),
                        callback_data: ban_target.ip.clone(),
                    },
                )
                .await;
        });
        // removed from in-process immediately after scheduling: the ban's
        // own completion does not gate this, only duplicate-scheduling
        // within this decision does.
        self.in_process_ips.remove(&in_process_ip);

        self.active_users
            .delete_user(&target_by_email.name, &target_by_email.ip);
    }

    fn count_matching(&self, target: &UserObservation) -> usize {
        self.repeated_out_of_limits
            .iter()
            .filter(|r| r.same_user_ip(target))
            .count()
    }

    fn purge_matching(&mut self, a: &UserObservation, b: &UserObservation) {
        self.repeated_out_of_limits
            .retain(|r| !r.same_user_ip(a) && !r.same_user_ip(b));
    }

    fn cap_repeats_for(&mut self, name: &str) {
        let headroom = self.policy.stl * REPEATS_PER_NAME_HEADROOM;
        let count = self
            .repeated_out_of_limits
            .iter()
            .filter(|r| r.name == name)
            .count();
        if count <= headroom {
            return;
        }
        let mut to_drop = count - headroom;
        self.repeated_out_of_limits.retain(|r| {
            if to_drop > 0 && r.name == name {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryPersistentStore, LoggingNotificationSink};
    use crate::services::limit_resolver::LimitResolver;
    use async_trait::async_trait;
    use guard_types::UserLimit;
    use parking_lot::Mutex;

    struct FixedResolver(i64);

    #[async_trait]
    impl LimitResolver for FixedResolver {
        async fn resolve(&self, name: &str) -> UserLimit {
            UserLimit::new(name, self.0)
        }
    }

    struct RecordingTransport {
        bans: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl BanTransport for RecordingTransport {
        async fn ban_user(&self, _node: &guard_types::Node, user: &UserObservation) -> eyre::Result<()> {
            self.bans.lock().push((user.name.clone(), user.ip.clone()));
            Ok(())
        }
    }

    fn obs(name: &str, ip: &str) -> UserObservation {
        UserObservation {
            name: name.to_string(),
            ip: ip.to_string(),
            node: "n1".to_string(),
            inbound: "in1".to_string(),
            accepted: None,
        }
    }

    fn service(limit: i64, stl: usize, iul: usize) -> (CheckService, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport {
            bans: Mutex::new(Vec::new()),
        });
        let service = CheckService::new(
            Arc::new(FixedResolver(limit)),
            Arc::new(InMemoryPersistentStore::new()),
            transport.clone(),
            Arc::new(LoggingNotificationSink),
            ban_dispatcher::node_registry(),
            DebouncePolicy {
                stl,
                iul,
                ban_last_user: false,
            },
        );
        (service, transport)
    }

    // `handle_observation` blocks the calling thread on the runtime handle
    // (as it does in production from the dedicated check-service thread),
    // so tests drive it from a `spawn_blocking` task rather than directly
    // from the `#[tokio::test]` body — calling `Handle::block_on` from a
    // task already running on that runtime panics.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_enforcement_when_limit_is_zero() {
        let (mut service, transport) = service(0, 3, 5);
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || {
            for i in 0..10 {
                service.handle_observation(obs("alice", &format!("10.0.0.{i}")), &handle);
            }
            assert!(transport.bans.lock().is_empty());
            assert_eq!(service.active_users.get_users("alice").len(), 10);
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exempt_ip_is_never_admitted() {
        let transport = Arc::new(RecordingTransport {
            bans: Mutex::new(Vec::new()),
        });
        let mut service = CheckService::new(
            Arc::new(FixedResolver(1)),
            Arc::new(InMemoryPersistentStore::new().except_ip("10.0.0.9")),
            transport.clone(),
            Arc::new(LoggingNotificationSink),
            ban_dispatcher::node_registry(),
            DebouncePolicy {
                stl: 3,
                iul: 5,
                ban_last_user: false,
            },
        );
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || {
            service.handle_observation(obs("bob", "10.0.0.1"), &handle);
            service.handle_observation(obs("bob", "10.0.0.9"), &handle);
            service.handle_observation(obs("bob", "10.0.0.9"), &handle);

            assert!(transport.bans.lock().is_empty());
            assert_eq!(service.active_users.get_users("bob").len(), 1);
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn under_stl_threshold_no_ban() {
        let (mut service, transport) = service(1, 3, 5);
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || {
            service.handle_observation(obs("carol", "A"), &handle);
            service.handle_observation(obs("carol", "B"), &handle);
            service.handle_observation(obs("carol", "B"), &handle);

            assert!(transport.bans.lock().is_empty());
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn threshold_reached_bans_exactly_once() {
        // carol's first-ever arrival (A) stays "earliest" for as long as it
        // isn't purged or banned, since the store only ever appends. Each
        // arrival of A or B alternately becomes the "latest" observation,
        // and each push into the debounce list is the just-admitted IP —
        // this alternation is exactly what's needed to push both `rl_len`
        // (matches on the earliest arrival, A) and `rl_last_len` (matches
        // on whichever IP is currently latest) to STL at the same step.
        let (mut service, transport) = service(1, 3, 5);
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || {
            for ip in ["A", "B", "A", "B", "A", "B", "A"] {
                service.handle_observation(obs("carol", ip), &handle);
            }
        })
        .await
        .unwrap();
        // the ban itself was spawned fire-and-forget onto the runtime;
        // give it a turn to run before asserting.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let bans = transport.bans.lock();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0], ("carol".to_string(), "A".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn imbalance_recovery_purges_without_banning() {
        let (mut service, transport) = service(1, 5, 2);
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || {
            service.handle_observation(obs("dan", "A"), &handle);
            for _ in 0..3 {
                service.handle_observation(obs("dan", "B"), &handle);
            }

            assert!(transport.bans.lock().is_empty());
            assert!(service.active_users.get_users("dan").iter().all(|o| o.ip != "A"));
            assert!(service.repeated_out_of_limits.is_empty());
        })
        .await
        .unwrap();
    }
}
