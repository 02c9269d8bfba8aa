//! The Log Stream Subscriber (C2): one reconnecting WebSocket-style
//! subscription per node, feeding parsed observations into the log
//! queue.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use guard_types::Node;
use rand::seq::SliceRandom as _;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{LogFrameParser, NotificationSink};
use crate::metrics::METRICS_ID_OBSERVATIONS_DROPPED;
use crate::services::log_queue::LogQueueSender;
use crate::services::panel_client::SharedPanelSession;

/// Poll intervals a connection randomly picks from, to de-synchronize
/// many simultaneous streams against the panel.
const POLL_INTERVALS: [&str; 4] = ["0.9", "1.3", "1.5", "1.7"];

/// Delay before reconnecting after any disconnect.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Runs the reconnect loop for a single node until `cancel` fires.
///
/// Every disconnect — orderly close, protocol error, refused connection,
/// timeout, or transport/TLS error — is logged, reported to the
/// notification sink, and followed by a fixed 10-second sleep before
/// reconnecting. This function only returns once `cancel` is triggered.
#[tracing::instrument(skip_all, fields(node = %node.name))]
pub async fn run_log_stream(
    node: Node,
    session: SharedPanelSession,
    sender: LogQueueSender,
    parser: Arc<dyn LogFrameParser>,
    notification: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let outcome = tokio::select! {
            outcome = stream_once(&node, &session, &sender, parser.as_ref()) => outcome,
            _ = cancel.cancelled() => return,
        };

        if let Err(reason) = outcome {
            tracing::warn!("log stream for node {} disconnected: {reason}", node.name);
            notification
                .notify(&format!(
                    "Lost log stream for node {}: {reason}",
                    node.name
                ))
                .await;
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

async fn stream_once(
    node: &Node,
    session: &SharedPanelSession,
    sender: &LogQueueSender,
    parser: &dyn LogFrameParser,
) -> Result<(), String> {
    let token = session
        .lock()
        .token()
        .map(|t| secrecy::ExposeSecret::expose_secret(t).to_string())
        .ok_or_else(|| "no panel token available yet".to_string())?;

    let interval = POLL_INTERVALS
        .choose(&mut rand::thread_rng())
        .expect("POLL_INTERVALS is non-empty");

    let domain = session.lock().domain.clone();
    for scheme in ["wss", "ws"] {
        let url = format!(
            "{scheme}://{domain}/api/nodes/{}/xray/logs?interval={interval}&token={token}",
            node.id
        );
        match connect_and_drain(&url, node, sender, parser).await {
            Ok(()) => return Ok(()),
            Err(err) => tracing::debug!("{scheme} attempt for node {} failed: {err}", node.name),
        }
    }
    Err(format!("both wss and ws attempts failed for node {}", node.name))
}

async fn connect_and_drain(
    url: &str,
    node: &Node,
    sender: &LogQueueSender,
    parser: &dyn LogFrameParser,
) -> Result<(), String> {
    let connector = tls_connector();
    let (mut ws, _) = tokio_tungstenite::connect_async_tls_with_config(
        url,
        None,
        false,
        Some(connector),
    )
    .await
    .map_err(|err| err.to_string())?;

    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(mut obs) = parser.parse_log_to_user(&text) {
                    obs.node = node.name.clone();
                    if !sender.offer(obs) {
                        metrics::counter!(METRICS_ID_OBSERVATIONS_DROPPED).increment(1);
                        tracing::warn!("log queue full, dropping observation from node {}", node.name);
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let _ = ws.close(None).await;
                return match frame {
                    Some(frame) if frame.code != tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal => {
                        Err(format!("{}: {}", frame.code, frame.reason))
                    }
                    _ => Ok(()),
                };
            }
            Some(Ok(_)) => {
                // ignore ping/pong/binary frames, the panel only sends text
            }
            Some(Err(err)) => {
                let _ = ws.close(None).await;
                return Err(err.to_string());
            }
            None => return Ok(()),
        }
    }
}

fn tls_connector() -> tokio_tungstenite::Connector {
    #[derive(Debug)]
    struct AcceptAnyCert;

    impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &rustls::pki_types::CertificateDer<'_>,
            _intermediates: &[rustls::pki_types::CertificateDer<'_>],
            _server_name: &rustls::pki_types::ServerName<'_>,
            _ocsp_response: &[u8],
            _now: rustls::pki_types::UnixTime,
        ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
            Ok(rustls::client::danger::ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &rustls::pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &rustls::pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    tokio_tungstenite::Connector::Rustls(Arc::new(config))
}
