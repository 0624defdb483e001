#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt column {column}: {reason}")]
    Corrupt { column: &'static str, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}
