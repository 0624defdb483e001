use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProbeError;

/// Captured result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Longest stderr excerpt carried in errors.
const STDERR_LIMIT: usize = 600;

/// Run `binary args...` to completion, bounded by `timeout` and `cancel`.
///
/// The child is spawned with `kill_on_drop`, so when the deadline or the
/// cancellation token wins the race the pending wait is dropped and the
/// process is killed.
pub async fn run_tool(
    binary: &str,
    args: &[String],
    timeout: Duration,
    phase: &'static str,
    cancel: &CancellationToken,
) -> Result<ToolOutput, ProbeError> {
    debug!(binary, ?args, "spawning scanner");
    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProbeError::Launch {
            binary: binary.to_string(),
            source,
        })?;

    let output = tokio::select! {
        result = child.wait_with_output() => result?,
        _ = tokio::time::sleep(timeout) => {
            return Err(ProbeError::Timeout { phase, after: timeout });
        }
        _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
    };

    Ok(ToolOutput {
        code: output.status.code(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: truncate(&String::from_utf8_lossy(&output.stderr), STDERR_LIMIT),
    })
}

fn truncate(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
