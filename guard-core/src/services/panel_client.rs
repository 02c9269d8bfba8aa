//! The Panel Client (C1): authenticates to the control panel, lists
//! healthy nodes, and fetches per-user service assignments.
//!
//! Every operation here tries `https` then `http` per attempt — many
//! panels run on self-signed TLS that may be disabled at runtime, so the
//! client disables certificate verification outright and tries both
//! schemes rather than hard-coding one.

use std::sync::Arc;

use guard_types::{
    Node, NodeListResponse, PanelSession, TokenRequest, TokenResponse, UserRecord,
};
use parking_lot::Mutex;
use rand::Rng;
use reqwest::StatusCode;
use secrecy::ExposeSecret as _;
use std::time::Duration;

use crate::collaborators::NotificationSink;
use crate::metrics::METRICS_ID_PANEL_AUTH_FAILURES;

/// Shared, lock-guarded panel session. Every collaborator that needs to
/// call the panel (C1 itself, C6's panel mode, C7) holds a clone.
pub type SharedPanelSession = Arc<Mutex<PanelSession>>;

const SCHEMES: [&str; 2] = ["https", "http"];
const AUTH_RETRY_ATTEMPTS: u32 = 20;
const GET_USER_RETRY_ATTEMPTS: u32 = 5;

/// Errors the panel client can surface. Transient failures within the
/// retry envelope are logged and retried, not returned — only exhaustion
/// of the envelope becomes an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum PanelClientError {
    /// All 20 authentication attempts (across both schemes) failed.
    #[error("failed to authenticate against the panel after {AUTH_RETRY_ATTEMPTS} attempts")]
    AuthExhausted,
}

/// HTTP client for the control panel's admin API.
pub struct PanelClient {
    http: reqwest::Client,
    notification: Arc<dyn NotificationSink>,
}

impl PanelClient {
    /// Builds a panel client. TLS verification is disabled to match
    /// panels deployed with self-signed certificates.
    pub fn new(notification: Arc<dyn NotificationSink>) -> Self {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .expect("reqwest client with static config never fails to build");
        Self { http, notification }
    }

    /// If `session` already has a token, returns immediately. Otherwise
    /// authenticates against `/api/admins/token`, retrying up to
    /// [`AUTH_RETRY_ATTEMPTS`] times with backoff
    /// `random(2..=5) * attempt` seconds between attempts.
    pub async fn ensure_token(
        &self,
        session: &SharedPanelSession,
    ) -> Result<(), PanelClientError> {
        if session.lock().has_token() {
            return Ok(());
        }

        let (username, password, domain) = {
            let guard = session.lock();
            (
                guard.username.clone(),
                guard.password.expose_secret().to_string(),
                guard.domain.clone(),
            )
        };

        for attempt in 0..AUTH_RETRY_ATTEMPTS {
            for scheme in SCHEMES {
                let url = format!("{scheme}://{domain}/api/admins/token");
                match self
                    .http
                    .post(&url)
                    .form(&TokenRequest {
                        username: &username,
                        password: &password,
                    })
                    .timeout(Duration::from_secs(5))
                    .send()
                    .await
                {
                    Ok(resp) if resp.status().is_success() => match resp.json::<TokenResponse>().await {
                        Ok(token) => {
                            session.lock().set_token(token.access_token.into());
                            return Ok(());
                        }
                        Err(err) => {
                            self.report_auth_failure(&format!("malformed token response: {err}"))
                                .await;
                        }
                    },
                    Ok(resp) => {
                        self.report_auth_failure(&format!(
                            "[{}] authenticating against {url}",
                            resp.status()
                        ))
                        .await;
                    }
                    Err(err) => {
                        self.report_auth_failure(&format!("{err} while calling {url}")).await;
                    }
                }
            }
            let backoff = rand::thread_rng().gen_range(2..=5) * u64::from(attempt);
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        }

        let message = format!(
            "Failed to get token after {AUTH_RETRY_ATTEMPTS} attempts. Make sure the panel is \
             running and the username and password are correct."
        );
        tracing::error!("{message}");
        self.notification.notify(&message).await;
        Err(PanelClientError::AuthExhausted)
    }

    async fn report_auth_failure(&self, message: &str) {
        metrics::counter!(METRICS_ID_PANEL_AUTH_FAILURES).increment(1);
        tracing::error!("{message}");
        self.notification.notify(message).await;
    }

    /// Lists nodes the panel reports as healthy, re-authenticating on the
    /// next attempt if a `401` clears the token mid-loop. Same 20-attempt
    /// retry envelope as [`PanelClient::ensure_token`].
    pub async fn list_healthy_nodes(
        &self,
        session: &SharedPanelSession,
    ) -> Result<Vec<Node>, PanelClientError> {
        for attempt in 0..AUTH_RETRY_ATTEMPTS {
            self.ensure_token(session).await?;
            let token = session
                .lock()
                .token()
                .map(|t| t.expose_secret().to_string());
            let Some(token) = token else {
                continue;
            };

            for scheme in SCHEMES {
                let domain = session.lock().domain.clone();
                let url = format!("{scheme}://{domain}/api/nodes?status=healthy");
                match self
                    .http
                    .get(&url)
                    .bearer_auth(&token)
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await
                {
                    Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                        session.lock().clear_token();
                        continue;
                    }
                    Ok(resp) if resp.status().is_success() => {
                        match resp.json::<NodeListResponse>().await {
                            Ok(list) => return Ok(list.into_nodes()),
                            Err(err) => {
                                tracing::error!("malformed node-list response: {err}");
                            }
                        }
                    }
                    Ok(resp) => {
                        tracing::error!("[{}] fetching nodes from {url}", resp.status());
                    }
                    Err(err) => {
                        tracing::error!("{err} while fetching nodes from {url}");
                    }
                }
            }
            let backoff = rand::thread_rng().gen_range(2..=5) * u64::from(attempt);
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        }

        let message = format!(
            "Failed to get nodes after {AUTH_RETRY_ATTEMPTS} attempts. Make sure the panel is \
             running and the username and password are correct."
        );
        tracing::error!("{message}");
        self.notification.notify(&message).await;
        Err(PanelClientError::AuthExhausted)
    }

    /// Fetches the panel's record for `username`. `404` yields `Ok(None)`;
    /// every other failure (auth exhaustion aside) is retried up to
    /// [`GET_USER_RETRY_ATTEMPTS`] times with a flat 1-second sleep, and
    /// ultimately also yields `Ok(None)` rather than an error — a missing
    /// or unreachable user record fails open to "unresolved", not to a
    /// hard error, matching the reference implementation.
    pub async fn get_user(
        &self,
        session: &SharedPanelSession,
        username: &str,
    ) -> Result<Option<UserRecord>, PanelClientError> {
        for _ in 0..GET_USER_RETRY_ATTEMPTS {
            self.ensure_token(session).await?;
            let token = session
                .lock()
                .token()
                .map(|t| t.expose_secret().to_string());
            let Some(token) = token else {
                continue;
            };

            for scheme in SCHEMES {
                let domain = session.lock().domain.clone();
                let url = format!("{scheme}://{domain}/api/users/{username}");
                match self
                    .http
                    .get(&url)
                    .bearer_auth(&token)
                    .header("Accept", "application/json")
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await
                {
                    Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                        session.lock().clear_token();
                        continue;
                    }
                    Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                        return Ok(None);
                    }
                    Ok(resp) if resp.status().is_success() => {
                        match resp.json::<UserRecord>().await {
                            Ok(record) => return Ok(Some(record)),
                            Err(err) => tracing::error!("malformed user record for {username}: {err}"),
                        }
                    }
                    Ok(resp) => {
                        tracing::error!("[{}] fetching user {username} from {url}", resp.status());
                    }
                    Err(err) => {
                        tracing::error!("{err} while fetching user {username} from {url}");
                    }
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(None)
    }
}
