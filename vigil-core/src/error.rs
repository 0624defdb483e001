use thiserror::Error;
use vigil_types::ScanStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid scan request: {0}")]
    Validation(#[from] vigil_types::TypeError),
    #[error("scan not found: {0}")]
    NotFound(String),
    #[error("scan {0} belongs to another user")]
    Forbidden(String),
    #[error("scan {id} is already {status}")]
    NotRunning { id: String, status: ScanStatus },
    #[error("scan cancelled")]
    Cancelled,
    #[error("store error: {0}")]
    Store(#[from] vigil_db::DbError),
    #[error("task join error: {0}")]
    TaskJoin(String),
}
