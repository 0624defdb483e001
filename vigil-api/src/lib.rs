// ---------------------------------------------------------------------------
// REST and WebSocket server
// ---------------------------------------------------------------------------
//
// Exposes scan orchestration over HTTP and streams scan, threat and incident
// events to WebSocket subscribers.

pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
mod metrics;
mod routes;
pub mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use config::{AuthConfig, ServerConfig};
use state::{AppState, Services};
use vigil_db::ScanStore;

/// Configuration for the API server.
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
    pub api_key: Option<String>,
    /// Database file; `None` uses the per-user default location.
    pub db_path: Option<PathBuf>,
    pub services: Services,
    pub server: ServerConfig,
    pub auth: AuthConfig,
}

/// Build the axum Router (useful for testing).
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    routes::build_router(state)
}

/// Start the API server and block until shutdown (Ctrl+C).
pub async fn start_server(config: ApiConfig) -> anyhow::Result<()> {
    let store = match &config.db_path {
        Some(path) => ScanStore::open(path)?,
        None => ScanStore::open_default()?,
    };
    let interrupted =
        store.fail_interrupted("Interrupted by server restart", vigil_types::now_ms())?;
    if interrupted > 0 {
        tracing::warn!(count = interrupted, "marked interrupted scans as failed");
    }

    let state = Arc::new(AppState::new(
        store,
        config.services,
        config.api_key,
        &config.auth,
        config.server,
    ));
    let metrics = metrics::spawn_metrics_task(state.clone());

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    metrics.abort();
    state.supervisor.shutdown();
    state.hub.reset();
    tracing::info!("API server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
