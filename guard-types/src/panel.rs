//! The control-panel session and the wire DTOs exchanged with its HTTP API.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Which control-panel flavor this enforcer is pointed at.
///
/// Only [`PanelType::Marzneshin`] has a shipped [`crate`] log parser and
/// panel client implementation in this crate; the others are recognized
/// by configuration but expect a collaborator-provided parser, per the
/// "panel-specific log parsers ... are not specified here" scope note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum PanelType {
    /// The primary, fully-implemented panel type.
    Marzneshin,
    /// Recognized, parser supplied externally.
    Marzban,
    /// Recognized, parser supplied externally.
    Rebecca,
    /// Recognized, parser supplied externally.
    Pasarguard,
}

/// Credentials and bearer-token state for one control-panel connection.
///
/// `password` and `token` are [`SecretString`]s so they never leak into
/// `Debug`/log output by accident. A session with a populated `token` is
/// assumed valid until an authenticated request returns `401`, at which
/// point [`PanelSession::clear_token`] is called and the next operation
/// re-authenticates lazily.
#[derive(Clone)]
pub struct PanelSession {
    /// Admin username used for `/api/admins/token`.
    pub username: String,
    /// Admin password. Never logged.
    pub password: SecretString,
    /// Panel host (no scheme), e.g. `panel.example.com`.
    pub domain: String,
    token: Option<SecretString>,
}

impl PanelSession {
    /// Creates a fresh, unauthenticated session.
    pub fn new(username: impl Into<String>, password: SecretString, domain: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password,
            domain: domain.into(),
            token: None,
        }
    }

    /// Returns the current bearer token, if any.
    pub fn token(&self) -> Option<&SecretString> {
        self.token.as_ref()
    }

    /// Returns `true` if a token is currently held.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Stores a freshly obtained access token.
    pub fn set_token(&mut self, token: SecretString) {
        self.token = Some(token);
    }

    /// Clears the token after a `401`, forcing re-authentication on the
    /// next operation.
    pub fn clear_token(&mut self) {
        self.token = None;
    }
}

impl std::fmt::Debug for PanelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelSession")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &"[redacted]")
            .field("has_token", &self.has_token())
            .finish()
    }
}

/// `POST /api/admins/token` form body.
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// `POST /api/admins/token` response body.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// `GET /api/users/{name}` response body.
///
/// Only the fields the limit resolver needs are modeled; the rest of the
/// panel's user record is panel-specific and out of scope.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub username: String,
    #[serde(default)]
    pub service_ids: Vec<i64>,
}
