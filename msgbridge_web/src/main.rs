use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use msgbridge_core::{BridgeProvider, SessionManager};
use msgbridge_web::{config::Cli, router, AppState};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins; `info` otherwise. Also picks up the core's `log` records.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let store = cli.store().context("resolving the sessions directory")?;
    info!("Sessions root: {}", store.root().display());
    info!("Protocol sidecar: {}", cli.bridge_url);

    let provider = Arc::new(BridgeProvider::new(cli.bridge_config()));
    let manager = SessionManager::new(provider, store, cli.manager_config());

    // bring stored accounts back without holding up the listener
    let restoring = manager.clone();
    tokio::spawn(async move {
        match restoring.restore_all().await {
            Ok(started) => info!("Restored {} session(s)", started),
            Err(e) => error!("Session restore failed: {}", e),
        }
    });

    let app = router(AppState {
        manager: manager.clone(),
        connect_on_send: cli.connect_on_send,
    });

    let addr = cli.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("msgbridge listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
