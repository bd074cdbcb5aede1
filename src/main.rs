use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use mmg::{build_router, AppState, GatewayConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::parse();
    let state = Arc::new(
        AppState::from_config(&config).context("invalid gateway configuration")?,
    );
    let router = build_router(Arc::clone(&state));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        "maas-mcp-gateway listening on {} (upstream: {})",
        addr, config.maas_api_url
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.tracker.shutdown();
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received ctrl-c, shutting down");
    }
}
