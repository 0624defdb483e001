use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to launch {binary}: {source}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{phase} timed out after {}s", .after.as_secs())]
    Timeout {
        phase: &'static str,
        after: Duration,
    },
    #[error("scanner exited with {}: {stderr}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()))]
    ToolFailed { code: Option<i32>, stderr: String },
    #[error("scan cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
