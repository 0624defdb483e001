#[derive(Debug, thiserror::Error)]
pub enum IntelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{feed} returned HTTP {status}")]
    Status { feed: &'static str, status: u16 },
    #[error("{feed} response could not be decoded: {reason}")]
    Decode { feed: &'static str, reason: String },
    #[error("lookup cancelled")]
    Cancelled,
    #[error("store error: {0}")]
    Store(#[from] vigil_db::DbError),
}
