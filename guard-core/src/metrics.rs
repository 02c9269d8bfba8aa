//! Metrics definitions for the enforcer.
//!
//! One `pub const METRICS_ID_*` per instrument, plus a single
//! [`describe_metrics`] called once at startup to attach metadata. The
//! HTTP surface that would expose these (an admin `/metrics` route) is
//! out of scope; this module is only the recording side.

/// Counter: bans issued, labeled implicitly by call site (no labels —
/// cardinality would otherwise track every banned username).
pub const METRICS_ID_BANS_ISSUED: &str = "xray_guard.bans.issued";
/// Counter: observations admitted to the active-users store.
pub const METRICS_ID_OBSERVATIONS_ADMITTED: &str = "xray_guard.observations.admitted";
/// Counter: observations dropped because the log queue was full.
pub const METRICS_ID_OBSERVATIONS_DROPPED: &str = "xray_guard.observations.dropped";
/// Counter: limit-resolution timeouts or errors (the observation that
/// triggered them is dropped).
pub const METRICS_ID_LIMIT_RESOLUTION_FAILURES: &str = "xray_guard.limit_resolution.failures";
/// Counter: panel authentication failures (each retry attempt, not just
/// the final `AuthExhausted`).
pub const METRICS_ID_PANEL_AUTH_FAILURES: &str = "xray_guard.panel.auth_failures";
/// Gauge: number of currently active per-node log stream tasks.
pub const METRICS_ID_ACTIVE_STREAMS: &str = "xray_guard.streams.active";
/// Counter: debouncer purge events (both the ban path and the
/// imbalance-recovery path increment this).
pub const METRICS_ID_DEBOUNCER_PURGES: &str = "xray_guard.debouncer.purges";
/// Counter: ban RPC failures per node (logged and swallowed).
pub const METRICS_ID_BAN_RPC_FAILURES: &str = "xray_guard.ban_rpc.failures";

/// Describes every metric above so scrapers get units and help text
/// instead of bare instrument names.
pub fn describe_metrics() {
    metrics::describe_counter!(
        METRICS_ID_BANS_ISSUED,
        metrics::Unit::Count,
        "Number of bans issued to the fleet"
    );
    metrics::describe_counter!(
        METRICS_ID_OBSERVATIONS_ADMITTED,
        metrics::Unit::Count,
        "Number of observations admitted to the active-users store"
    );
    metrics::describe_counter!(
        METRICS_ID_OBSERVATIONS_DROPPED,
        metrics::Unit::Count,
        "Number of observations dropped because the log queue was full"
    );
    metrics::describe_counter!(
        METRICS_ID_LIMIT_RESOLUTION_FAILURES,
        metrics::Unit::Count,
        "Number of limit resolutions that errored or timed out"
    );
    metrics::describe_counter!(
        METRICS_ID_PANEL_AUTH_FAILURES,
        metrics::Unit::Count,
        "Number of failed panel authentication attempts"
    );
    metrics::describe_gauge!(
        METRICS_ID_ACTIVE_STREAMS,
        metrics::Unit::Count,
        "Number of currently active per-node log stream tasks"
    );
    metrics::describe_counter!(
        METRICS_ID_DEBOUNCER_PURGES,
        metrics::Unit::Count,
        "Number of times the debouncer's repeated-violations list was purged"
    );
    metrics::describe_counter!(
        METRICS_ID_BAN_RPC_FAILURES,
        metrics::Unit::Count,
        "Number of per-node ban RPC failures"
    );
}
