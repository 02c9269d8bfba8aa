//! Configuration types and CLI/environment parsing for the enforcer.
//!
//! Every field here corresponds to one of the documented environment
//! variables this enforcer reads at startup. Durations are
//! parsed with `humantime` so `PANEL_NODE_RESET=5min` and
//! `PANEL_NODE_RESET=300` are both accepted. `MARZNESHIN_SERVICES` uses
//! its own small parser (below) that logs and skips malformed entries
//! rather than failing startup, matching the reference implementation's
//! `try/except` around the same parse.

use std::{collections::HashMap, net::SocketAddr, time::Duration};

use clap::Parser;
use guard_types::PanelType;
use secrecy::SecretString;

/// Top-level configuration for the enforcer binary.
///
/// Parsed once at startup via [`GuardConfig::parse`]; a malformed value
/// is a fatal, startup-time error (the only kind of error the ingest
/// pipeline treats as fatal).
#[derive(Parser, Debug)]
#[command(name = "xray-guard", about = "Per-user concurrent-IP limiter for Xray fleets")]
pub struct GuardConfig {
    /// Enables verbose (debug-level) logging.
    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Reserved for a hosting admin surface (out of scope for this
    /// crate); kept so downstream binaries can gate their own docs route
    /// on the same flag the source used.
    #[arg(long, env = "DOCS", default_value_t = false)]
    pub docs: bool,

    /// Which control-panel flavor to talk to.
    #[arg(long, env = "PANEL_TYPE", value_enum, default_value = "marzneshin")]
    pub panel_type: PanelType,

    /// Whether to resolve limits against the panel at all. When `false`,
    /// the limit resolver runs in local mode against a `PersistentStore`
    /// collaborator instead of calling out to C1.
    #[arg(long, env = "SYNC_WITH_PANEL", default_value_t = true)]
    pub sync_with_panel: bool,

    /// Panel admin username.
    #[arg(long, env = "PANEL_USERNAME")]
    pub panel_username: String,

    /// Panel admin password. Never logged.
    #[arg(long, env = "PANEL_PASSWORD")]
    pub panel_password: SecretString,

    /// Panel host, without scheme (the client tries `https` then `http`).
    #[arg(long, env = "PANEL_ADDRESS")]
    pub panel_address: String,

    /// If non-empty, restricts streaming to nodes whose name appears in
    /// this list; otherwise every healthy node the panel reports is
    /// subscribed to.
    #[arg(long, env = "PANEL_CUSTOM_NODES", value_delimiter = ',')]
    pub panel_custom_nodes: Vec<String>,

    /// How often the fleet supervisor re-lists nodes and recreates
    /// stream tasks.
    #[arg(
        long,
        env = "PANEL_NODE_RESET",
        default_value = "10min",
        value_parser = humantime::parse_duration
    )]
    pub panel_node_reset: Duration,

    /// TTL for the panel-mode limit cache.
    #[arg(
        long,
        env = "CACHE_TTL",
        default_value = "10min",
        value_parser = humantime::parse_duration
    )]
    pub cache_ttl: Duration,

    /// `"sid:limit,sid:limit,..."` mapping of panel service ids to IP
    /// limits, consulted by the panel-mode limit resolver.
    #[arg(long, env = "MARZNESHIN_SERVICES", default_value = "")]
    pub marzneshin_services: String,

    /// Limit used when a user has no resolvable service assignment (the
    /// source's `DEFAULT_LIMIT`).
    #[arg(long, env = "DEFAULT_LIMIT", default_value_t = 2)]
    pub default_limit: i64,

    /// "Seen-times limit": repeated over-limit observations required
    /// before a ban fires.
    #[arg(long, env = "STL", default_value_t = 3)]
    pub stl: usize,

    /// "Imbalance unban level": maximum tolerable asymmetry between
    /// first-user and last-user repeat counts before the stale first
    /// entry is evicted instead of banned.
    #[arg(long, env = "IUL", default_value_t = 5)]
    pub iul: usize,

    /// Ban the most recently observed offending IP instead of the
    /// earliest-seen one.
    #[arg(long, env = "BAN_LAST_USER", default_value_t = false)]
    pub ban_last_user: bool,

    /// Include the `accepted` flag in ban log messages when present.
    #[arg(long, env = "ACCEPTED", default_value_t = false)]
    pub accepted: bool,

    /// Bind address for a hosting admin surface. Unused by this crate —
    /// the HTTP admin surface is out of scope — but kept so a binary
    /// embedding this core can wire one up without inventing its own
    /// environment variable.
    #[arg(long, env = "UVICORN_HOST_PORT")]
    pub admin_bind_addr: Option<SocketAddr>,
}

impl GuardConfig {
    /// Parses `services_limit` out of [`GuardConfig::marzneshin_services`].
    ///
    /// Malformed entries (missing `:`, non-integer halves) are logged
    /// and skipped; this never fails startup, matching the reference
    /// parser's behavior.
    pub fn services_limit(&self) -> HashMap<i64, i64> {
        parse_services_limit(&self.marzneshin_services)
    }
}

fn parse_services_limit(raw: &str) -> HashMap<i64, i64> {
    let mut limits = HashMap::new();
    for item in raw.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let Some((sid, limit)) = item.split_once(':') else {
            tracing::warn!("MARZNESHIN_SERVICES entry {item:?} missing ':', skipping");
            continue;
        };
        match (sid.trim().parse::<i64>(), limit.trim().parse::<i64>()) {
            (Ok(sid), Ok(limit)) => {
                limits.insert(sid, limit);
            }
            _ => {
                tracing::warn!("MARZNESHIN_SERVICES entry {item:?} is not `int:int`, skipping");
            }
        }
    }
    limits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_services() {
        let limits = parse_services_limit("1:2,3:4");
        assert_eq!(limits.get(&1), Some(&2));
        assert_eq!(limits.get(&3), Some(&4));
    }

    #[test]
    fn skips_malformed_entries_without_panicking() {
        let limits = parse_services_limit("1:2, bogus, 3:, :4, 5:6");
        assert_eq!(limits.len(), 2);
        assert_eq!(limits.get(&1), Some(&2));
        assert_eq!(limits.get(&5), Some(&6));
    }

    #[test]
    fn empty_string_yields_empty_map() {
        assert!(parse_services_limit("").is_empty());
    }
}
