//! The resolved per-user IP limit.

/// The IP-count limit resolved for a user by the limit resolver (C6).
///
/// `limit == 0` means "no enforcement for this user" — the check service
/// exempts the observation without recording it. `0` is also the value
/// used for the single-flight sentinel and for unresolved users; an
/// explicit `limit: 0` and "not yet resolved" are deliberately kept
/// indistinguishable so both fail open to "don't enforce".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLimit {
    /// The panel username this limit applies to.
    pub name: String,
    /// Maximum number of distinct simultaneous source IPs, or `0` for
    /// "not enforced".
    pub limit: i64,
}

impl UserLimit {
    /// Constructs a new resolved limit.
    pub fn new(name: impl Into<String>, limit: i64) -> Self {
        Self {
            name: name.into(),
            limit,
        }
    }

    /// The sentinel used to short-circuit re-entrant panel-mode lookups
    /// while a fetch is in flight, and the fallback for users the panel
    /// doesn't know about.
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }

    /// `true` when this limit means "don't enforce for this user".
    pub const fn is_unenforced(&self) -> bool {
        self.limit == 0
    }
}
