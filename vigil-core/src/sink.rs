use tracing::{info, warn};
use vigil_types::ServerEvent;

/// Where the orchestrator sends its events.
///
/// Publishing never blocks and never fails; delivery is best effort.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ServerEvent);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: ServerEvent) {}
}

/// Renders events as log lines. Used by the one-shot CLI scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: ServerEvent) {
        match event {
            ServerEvent::ScanStarted {
                scan_id, targets, ..
            } => {
                info!(%scan_id, targets = targets.len(), "scan started");
            }
            ServerEvent::ScanProgress {
                scan_id,
                phase,
                target,
                progress,
                error,
            } => match error {
                Some(error) => warn!(%scan_id, ?phase, target, %error, "target failed"),
                None => info!(
                    %scan_id,
                    ?phase,
                    target,
                    pct = progress.percentage,
                    "{}",
                    progress.message
                ),
            },
            ServerEvent::NewThreat { threat, .. } => info!(
                indicator = %threat.indicator,
                kind = %threat.threat_type,
                severity = %threat.severity,
                "threat detected"
            ),
            ServerEvent::ScanCompleted {
                scan_id, results, ..
            } => info!(
                %scan_id,
                findings = results.findings.len(),
                risk_score = results.risk_score,
                "scan completed"
            ),
            ServerEvent::ScanFailed { scan_id, error, .. } => warn!(%scan_id, %error, "scan failed"),
            ServerEvent::ScanCancelled { scan_id, .. } => info!(%scan_id, "scan cancelled"),
            _ => {}
        }
    }
}
