//! Binary entry point for the enforcer.
//!
//! Initializes tracing, parses configuration, wires the reference
//! collaborator implementations, and runs until a shutdown signal is
//! received.

use std::sync::Arc;

use clap::Parser as _;
use eyre::Context as _;
use guard_core::collaborators::{InMemoryPersistentStore, LoggingNotificationSink};
use guard_core::config::GuardConfig;
use guard_core::{GuardCollaborators, GuardServiceBuilder};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    let config = GuardConfig::parse();

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!("starting xray-guard with config: {config:?}");

    let collaborators = GuardCollaborators {
        parser: Arc::new(guard_core::collaborators::reference::MarzneshinLogParser::default()),
        notification: Arc::new(LoggingNotificationSink),
        ban_transport: Arc::new(guard_core::collaborators::reference::LoggingBanTransport),
        persistent_store: Arc::new(InMemoryPersistentStore::new()),
    };

    let service = GuardServiceBuilder::init(config, collaborators)
        .await
        .context("while starting the enforcement pipeline")?;
    let shutdown = service.shutdown_token();

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, cancelling cooperative side");
        shutdown.cancel();
    });

    service.join_cooperative_side().await?;
    tracing::info!("xray-guard stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
