// ---------------------------------------------------------------------------
// Threat-intelligence routes
// ---------------------------------------------------------------------------

use std::sync::Arc;

use axum::Json;
use axum::extract::{Extension, Query, State};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vigil_core::CancellationToken;
use vigil_db::UpsertOutcome;
use vigil_intel::save_indicator;
use vigil_types::{IndicatorKind, ServerEvent, ThreatIndicator, is_network_block, now_ms};

use super::scans::PageQuery;
use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /api/threats: stored indicators
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ThreatListResponse {
    pub indicators: Vec<ThreatIndicator>,
    pub total: u64,
}

pub async fn list_threats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageQuery>,
) -> Result<Json<ThreatListResponse>, ApiError> {
    let (limit, offset) = params.bounds();
    let store = state.store.lock().await;
    Ok(Json(ThreatListResponse {
        indicators: store.list_indicators(limit, offset)?,
        total: store.count_indicators()?,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/threat-intel/lookup: ad hoc lookup
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LookupRequest {
    pub indicator: String,
    pub kind: Option<IndicatorKind>,
}

pub async fn lookup_indicator(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<LookupRequest>,
) -> Result<Json<ThreatIndicator>, ApiError> {
    let indicator = request.indicator.trim();
    if indicator.is_empty() || indicator.len() > 2048 {
        return Err(ApiError::InvalidIndicator(
            "must be between 1 and 2048 characters".into(),
        ));
    }
    if is_network_block(indicator) {
        return Err(ApiError::InvalidIndicator(
            "network blocks are not single indicators".into(),
        ));
    }
    let kind = request
        .kind
        .unwrap_or_else(|| IndicatorKind::infer(indicator));

    let verdict = state
        .intel()
        .lookup(indicator, kind, &CancellationToken::new())
        .await?;

    if verdict.is_threat() && verdict.confidence > 0 {
        let outcome = {
            let store = state.store.lock().await;
            save_indicator(&store, &verdict, identity.user(), now_ms())
        };
        let event = match outcome {
            Ok(UpsertOutcome::Updated) => ServerEvent::ThreatUpdate {
                threat: Box::new(verdict.clone()),
            },
            Ok(UpsertOutcome::Inserted) => ServerEvent::NewThreat {
                scan_id: None,
                threat: Box::new(verdict.clone()),
            },
            Err(e) => {
                warn!(indicator, error = %e, "failed to save threat indicator");
                ServerEvent::NewThreat {
                    scan_id: None,
                    threat: Box::new(verdict.clone()),
                }
            }
        };
        state.hub.broadcast(event);
        info!(indicator, kind = %verdict.threat_type, "threat indicator reported");
    }

    Ok(Json(verdict))
}
