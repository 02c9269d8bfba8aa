//! The Limit Resolver (C6): answers "how many concurrent IPs is `name`
//! allowed?" either from local configuration or from the panel, with a
//! TTL cache in front of the panel lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use guard_types::UserLimit;
use moka::sync::Cache;

use crate::collaborators::PersistentStore;
use crate::services::panel_client::{PanelClient, SharedPanelSession};

/// Upper bound on distinct usernames tracked by the panel-mode cache.
const PANEL_CACHE_CAPACITY: u64 = 100_000;

/// Resolves the enforced concurrent-IP limit for a username.
#[async_trait]
pub trait LimitResolver: Send + Sync {
    /// Returns the limit to enforce for `name`. A limit of `0` means
    /// "not yet resolved" and callers must treat the observation as
    /// exempt from enforcement for this round rather than banning on a
    /// default.
    async fn resolve(&self, name: &str) -> UserLimit;
}

/// Local-mode resolver: consults a [`PersistentStore`] for a per-user
/// override and otherwise falls back to the configured default limit.
pub struct LocalLimitResolver {
    store: Arc<dyn PersistentStore>,
    default_limit: i64,
}

impl LocalLimitResolver {
    pub fn new(store: Arc<dyn PersistentStore>, default_limit: i64) -> Self {
        Self {
            store,
            default_limit,
        }
    }
}

#[async_trait]
impl LimitResolver for LocalLimitResolver {
    async fn resolve(&self, name: &str) -> UserLimit {
        self.store
            .local_limit(name)
            .unwrap_or_else(|| UserLimit::new(name, self.default_limit))
    }
}

/// Panel-mode resolver: looks a user's assigned service IDs up against a
/// configured `service_id -> limit` table, caching results in a
/// capacity- and TTL-bounded [`moka`] cache.
///
/// Before calling the panel, a sentinel `UserLimit::unresolved(name)` is
/// inserted into the cache. This approximates single-flight without a
/// per-name lock: concurrent callers for the same name during the fetch
/// see the sentinel and fail open (treat the user as unresolved for this
/// round) rather than issuing duplicate panel calls or blocking on each
/// other. The real value overwrites the sentinel once the fetch
/// completes, so the next observation for that name resolves correctly.
pub struct PanelLimitResolver {
    panel: Arc<PanelClient>,
    session: SharedPanelSession,
    services_limit: HashMap<i64, i64>,
    cache: Cache<String, UserLimit>,
}

impl PanelLimitResolver {
    pub fn new(
        panel: Arc<PanelClient>,
        session: SharedPanelSession,
        services_limit: HashMap<i64, i64>,
        cache_ttl: Duration,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(PANEL_CACHE_CAPACITY)
            .time_to_live(cache_ttl)
            .build();
        Self {
            panel,
            session,
            services_limit,
            cache,
        }
    }

    /// Limit of the first of `service_ids` that appears as a key in the
    /// configured services-limit mapping, in the order the panel returned
    /// them, or `0` ("no enforcement") if none match.
    fn limit_for_services(&self, service_ids: &[i64]) -> i64 {
        service_ids
            .iter()
            .find_map(|id| self.services_limit.get(id))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl LimitResolver for PanelLimitResolver {
    async fn resolve(&self, name: &str) -> UserLimit {
        if let Some(cached) = self.cache.get(name) {
            return cached;
        }

        self.cache
            .insert(name.to_string(), UserLimit::unresolved(name));

        match self.panel.get_user(&self.session, name).await {
            Ok(Some(record)) => {
                let limit = UserLimit::new(name, self.limit_for_services(&record.service_ids));
                self.cache.insert(name.to_string(), limit.clone());
                limit
            }
            Ok(None) => {
                tracing::warn!("panel has no record for {name}, leaving as unresolved");
                UserLimit::unresolved(name)
            }
            Err(err) => {
                tracing::error!("limit resolution for {name} failed: {err}");
                UserLimit::unresolved(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryPersistentStore;

    #[tokio::test]
    async fn local_resolver_falls_back_to_default() {
        let store = Arc::new(InMemoryPersistentStore::new().with_limit("alice", 3));
        let resolver = LocalLimitResolver::new(store, 2);

        assert_eq!(resolver.resolve("alice").await.limit, 3);
        assert_eq!(resolver.resolve("bob").await.limit, 2);
    }

    #[test]
    fn limit_for_services_takes_the_first_configured_match_or_zero() {
        let services_limit = HashMap::from([(1, 2), (2, 5)]);
        let resolver = PanelLimitResolver {
            panel: Arc::new(PanelClient::new(Arc::new(
                crate::collaborators::LoggingNotificationSink,
            ))),
            session: Arc::new(parking_lot::Mutex::new(guard_types::PanelSession::new(
                "admin",
                "pw".to_string().into(),
                "panel.example.com",
            ))),
            services_limit,
            cache: Cache::builder().build(),
        };

        assert_eq!(resolver.limit_for_services(&[2, 1]), 5);
        assert_eq!(resolver.limit_for_services(&[]), 0);
        assert_eq!(resolver.limit_for_services(&[99]), 0);
    }
}
