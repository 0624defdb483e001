// ---------------------------------------------------------------------------
// Scan routes
// ---------------------------------------------------------------------------

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;
use vigil_types::{Scan, ScanStatus};

use crate::auth::Identity;
use crate::config::StartScanRequest;
use crate::error::ApiError;
use crate::state::AppState;

const MAX_PAGE_SIZE: usize = 200;

// ---------------------------------------------------------------------------
// POST /api/scan/start: start a new scan
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StartScanResponse {
    pub scan_id: String,
    pub status: ScanStatus,
}

pub async fn start_scan(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<StartScanRequest>,
) -> Result<(StatusCode, Json<StartScanResponse>), ApiError> {
    let config = request.scan_config().map_err(ApiError::InvalidScanRequest)?;
    let scan = state
        .supervisor
        .start_tagged(&request.targets, config, identity.0, request.tags)
        .await?;

    info!(scan_id = %scan.id, "scan accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(StartScanResponse {
            scan_id: scan.id,
            status: scan.status,
        }),
    ))
}

// ---------------------------------------------------------------------------
// GET /api/scan/active: running scans
// ---------------------------------------------------------------------------

pub async fn active_scans(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Scan>>, ApiError> {
    let store = state.store.lock().await;
    Ok(Json(store.list_active(identity.user())?))
}

// ---------------------------------------------------------------------------
// GET /api/scan/history: scan history
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageQuery {
    pub fn bounds(&self) -> (usize, usize) {
        (
            self.limit.unwrap_or(50).min(MAX_PAGE_SIZE),
            self.offset.unwrap_or(0),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ScanHistoryResponse {
    pub scans: Vec<Scan>,
    pub limit: usize,
    pub offset: usize,
}

pub async fn scan_history(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<PageQuery>,
) -> Result<Json<ScanHistoryResponse>, ApiError> {
    let (limit, offset) = params.bounds();
    let store = state.store.lock().await;
    let scans = store.list_scans(identity.user(), limit, offset)?;
    Ok(Json(ScanHistoryResponse {
        scans,
        limit,
        offset,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/scan/{id}: one scan
// ---------------------------------------------------------------------------

pub async fn get_scan(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(scan_id): Path<String>,
) -> Result<Json<Scan>, ApiError> {
    let store = state.store.lock().await;
    let scan = store
        .load_scan(&scan_id)?
        .ok_or_else(|| ApiError::ScanNotFound(scan_id.clone()))?;
    if !scan.is_owned_by(identity.user()) {
        return Err(ApiError::NotScanOwner(scan_id));
    }
    Ok(Json(scan))
}

// ---------------------------------------------------------------------------
// POST /api/scan/{id}/cancel: cancel a running scan
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CancelScanResponse {
    pub message: String,
    pub scan_id: String,
    pub status: ScanStatus,
}

pub async fn cancel_scan(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(scan_id): Path<String>,
) -> Result<Json<CancelScanResponse>, ApiError> {
    let scan = state.supervisor.cancel(&scan_id, identity.user()).await?;
    Ok(Json(CancelScanResponse {
        message: scan
            .error_message
            .unwrap_or_else(|| vigil_core::CANCELLED_BY_USER.to_string()),
        scan_id: scan.id,
        status: scan.status,
    }))
}
