// ---------------------------------------------------------------------------
// API error types
// ---------------------------------------------------------------------------

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use vigil_core::EngineError;
use vigil_intel::IntelError;
use vigil_types::ScanStatus;

/// JSON body of every error response: a stable machine key plus a message.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Targets, ports, scan type or phase toggles did not validate.
    #[error("invalid scan request: {0}")]
    InvalidScanRequest(String),
    #[error("invalid indicator: {0}")]
    InvalidIndicator(String),
    /// Malformed request outside the scan and lookup bodies.
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("scan {0} belongs to another user")]
    NotScanOwner(String),
    #[error("scan not found: {0}")]
    ScanNotFound(String),
    #[error("scan {id} is already {status}")]
    ScanNotRunning { id: String, status: ScanStatus },
    #[error("too many real-time connections")]
    TooManyConnections,
    #[error("threat intelligence unavailable: {0}")]
    ThreatIntel(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidScanRequest(_)
            | ApiError::InvalidIndicator(_)
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotScanOwner(_) => StatusCode::FORBIDDEN,
            ApiError::ScanNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ScanNotRunning { .. } => StatusCode::CONFLICT,
            ApiError::TooManyConnections => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ThreatIntel(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `error` key clients match on.
    pub fn key(&self) -> &'static str {
        match self {
            ApiError::InvalidScanRequest(_) => "invalid_scan_request",
            ApiError::InvalidIndicator(_) => "invalid_indicator",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotScanOwner(_) => "scan_forbidden",
            ApiError::ScanNotFound(_) => "scan_not_found",
            ApiError::ScanNotRunning { .. } => "scan_not_running",
            ApiError::TooManyConnections => "too_many_connections",
            ApiError::ThreatIntel(_) => "threat_intel_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Details stay in the log.
            ApiError::Internal(details) => {
                tracing::error!(%details, "internal server error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (
            status,
            Json(ApiErrorBody {
                error: self.key().into(),
                message,
            }),
        )
            .into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(inner) => ApiError::InvalidScanRequest(inner.to_string()),
            EngineError::NotFound(id) => ApiError::ScanNotFound(id),
            EngineError::Forbidden(id) => ApiError::NotScanOwner(id),
            EngineError::NotRunning { id, status } => ApiError::ScanNotRunning { id, status },
            EngineError::Cancelled | EngineError::Store(_) | EngineError::TaskJoin(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<IntelError> for ApiError {
    fn from(e: IntelError) -> Self {
        match e {
            IntelError::Store(_) => ApiError::Internal(e.to_string()),
            _ => ApiError::ThreatIntel(e.to_string()),
        }
    }
}

impl From<vigil_db::DbError> for ApiError {
    fn from(e: vigil_db::DbError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
