// ---------------------------------------------------------------------------
// Route registration
// ---------------------------------------------------------------------------

mod scans;
mod system;
mod threats;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let health_route = Router::new().route("/api/system/health", get(system::health_check));

    // The WebSocket route authenticates through its query string since
    // browsers cannot set headers on the upgrade request.
    let ws_route = Router::new().route("/api/events", get(ws::events_ws));

    let api_routes = Router::new()
        .route("/api/scan/start", post(scans::start_scan))
        .route("/api/scan/active", get(scans::active_scans))
        .route("/api/scan/history", get(scans::scan_history))
        .route("/api/scan/{id}", get(scans::get_scan))
        .route("/api/scan/{id}/cancel", post(scans::cancel_scan))
        .route("/api/threats", get(threats::list_threats))
        .route("/api/threat-intel/lookup", post(threats::lookup_indicator))
        .route("/api/system/status", get(system::status))
        // Always layered: the middleware resolves the caller's identity even
        // when no API key is configured.
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    // CORS: restrict to localhost origins by default. Deployments exposed to
    // a network belong behind a reverse proxy that handles CORS itself.
    let cors = CorsLayer::new()
        .allow_origin([
            "http://localhost:3000".parse().unwrap(), // dashboard dev server
            "http://localhost:5173".parse().unwrap(), // Vite dev server
            "http://127.0.0.1:3000".parse().unwrap(),
        ])
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .max_age(std::time::Duration::from_secs(3600));

    health_route
        .merge(ws_route)
        .merge(api_routes)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024)) // 2 MB (scan requests are small)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
