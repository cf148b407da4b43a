//! HTTP server: state, routes, health, and the serve loop.

pub mod health;
pub mod routes;
pub mod state;

use state::AppState;
use std::net::SocketAddr;
use std::time::Duration;

/// Bind and serve until shutdown is signalled.
///
/// # Errors
///
/// Returns an error when the listener cannot bind or the server fails.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
) -> anyhow::Result<()> {
    let router = routes::build_router(state, request_timeout);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to install shutdown handler");
    }
    tracing::info!("shutdown signal received");
}
