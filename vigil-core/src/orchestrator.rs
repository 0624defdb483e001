// ---------------------------------------------------------------------------
// Scan orchestration
// ---------------------------------------------------------------------------
//
// Targets run one after another; phases within a target run in order. The
// terminal write is awaited before the terminal event is published.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vigil_db::ScanStore;
use vigil_intel::{IntelError, ThreatIntelAggregator, save_indicator};
use vigil_probe::{PortScanOptions, ProbeError, ServiceScanner};
use vigil_types::{
    IndicatorKind, Progress, Scan, ScanPhase, ScanResults, ScanStatus, ServerEvent,
    ServiceRecord, SeveritySummary, TargetOs, ThreatIndicator, is_network_block, now_ms,
};

use crate::analysis::Analyzer;
use crate::error::EngineError;
use crate::sink::EventSink;

/// The store shared between the orchestrator and the HTTP surface.
pub type SharedStore = Arc<Mutex<ScanStore>>;

/// Share of the progress bar spent on per-target phases.
const TARGET_SHARE: usize = 60;
const VULN_MILESTONE: u8 = 70;
const ANALYSIS_MILESTONE: u8 = 85;

/// How a scan run ended, from the orchestrator's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Completed(Box<ScanResults>),
    Failed(String),
    /// Cancelled before completion; the record was written by whoever
    /// cancelled it.
    Cancelled,
}

pub struct Orchestrator {
    store: SharedStore,
    scanner: Arc<dyn ServiceScanner>,
    intel: Arc<ThreatIntelAggregator>,
    analyzer: Arc<Analyzer>,
    sink: Arc<dyn EventSink>,
}

/// Progress after `step` of 3 per-target phases for target `index`.
///
/// Phases split the target's slice of the first 60% into thirds, so the
/// value only grows and the last target ends exactly on 60.
pub fn target_progress(index: usize, total: usize, step: usize) -> u8 {
    let total = total.max(1);
    let step = step.min(3);
    ((index * 3 + step) * TARGET_SHARE / (total * 3)).min(TARGET_SHARE) as u8
}

/// Fold service-detection records into the port-scan records. A detected
/// record replaces the discovered one on the same socket; new ones are
/// appended.
pub fn merge_services(
    discovered: Vec<ServiceRecord>,
    detected: Vec<ServiceRecord>,
) -> Vec<ServiceRecord> {
    let mut merged = discovered;
    for record in detected {
        match merged.iter_mut().find(|r| r.key() == record.key()) {
            Some(existing) => *existing = record,
            None => merged.push(record),
        }
    }
    merged
}

/// Values sent to the threat feeds for one target.
///
/// A network block is never looked up as such; the hosts found inside it are
/// looked up instead, once each.
pub fn intel_indicators(target: &str, services: &[ServiceRecord]) -> Vec<String> {
    if !is_network_block(target) {
        return vec![target.to_string()];
    }
    let mut hosts: Vec<String> = Vec::new();
    for record in services {
        if record.target != target && !hosts.contains(&record.target) {
            hosts.push(record.target.clone());
        }
    }
    hosts
}

/// Per-run mutable state.
struct Run<'a> {
    scan: &'a Scan,
    progress: Progress,
    services: Vec<ServiceRecord>,
    threats: Vec<ThreatIndicator>,
    os: Vec<TargetOs>,
}

impl Orchestrator {
    pub fn new(
        store: SharedStore,
        scanner: Arc<dyn ServiceScanner>,
        intel: Arc<ThreatIntelAggregator>,
        analyzer: Arc<Analyzer>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            scanner,
            intel,
            analyzer,
            sink,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn intel(&self) -> &Arc<ThreatIntelAggregator> {
        &self.intel
    }

    /// Run every phase of `scan` and persist the terminal state.
    ///
    /// `scan` must already be stored as `running`. On cancellation nothing
    /// further is written; the canceller owns the record.
    pub async fn perform_scan(&self, scan: &Scan, cancel: &CancellationToken) -> ScanOutcome {
        self.sink.publish(ServerEvent::ScanStarted {
            scan_id: scan.id.clone(),
            targets: scan.targets.clone(),
            owner: scan.owner.clone(),
        });
        info!(scan_id = %scan.id, targets = scan.targets.len(), "scan running");

        match self.run_phases(scan, cancel).await {
            Ok((results, progress)) => self.complete(scan, results, progress).await,
            Err(EngineError::Cancelled) => {
                info!(scan_id = %scan.id, "scan task observed cancellation");
                ScanOutcome::Cancelled
            }
            Err(e) => self.fail(scan, &e.to_string()).await,
        }
    }

    async fn run_phases(
        &self,
        scan: &Scan,
        cancel: &CancellationToken,
    ) -> Result<(ScanResults, Progress), EngineError> {
        let started = Instant::now();
        let mut run = Run {
            scan,
            progress: scan.progress.clone(),
            services: Vec::new(),
            threats: Vec::new(),
            os: Vec::new(),
        };
        let total = scan.targets.len();

        for (index, target) in scan.targets.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if let Err(e) = self.scan_target(&mut run, index, target, cancel).await {
                if matches!(e, ProbeError::Cancelled) {
                    return Err(EngineError::Cancelled);
                }
                warn!(scan_id = %scan.id, target, error = %e, "target failed, continuing");
                run.progress.current = index + 1;
                let pct = target_progress(index, total, 3);
                self.report(
                    &mut run,
                    ScanPhase::TargetError,
                    Some(target),
                    pct,
                    format!("Failed to scan {target}"),
                    Some(e.to_string()),
                )
                .await;
            }
        }

        let phases = &scan.config.phases;
        let mut results = ScanResults {
            services: run.services.clone(),
            threats: run.threats.clone(),
            os: run.os.clone(),
            ..Default::default()
        };

        if phases.vulnerability_analysis {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            results.findings = vigil_vuln::analyze(&results.services);
            let message = format!("Found {} potential vulnerabilities", results.findings.len());
            self.report(
                &mut run,
                ScanPhase::VulnerabilityAnalysisComplete,
                None,
                VULN_MILESTONE,
                message,
                None,
            )
            .await;
        }

        results.summary = SeveritySummary::from_findings(&results.findings);
        results.risk_score = vigil_vuln::risk_score(&results.summary, &results.threats);

        if phases.ai_analysis {
            let explanation = tokio::select! {
                text = self.analyzer.explain(&scan.targets, &results) => text,
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            };
            results.ai_analysis = Some(explanation);
            self.report(
                &mut run,
                ScanPhase::AiAnalysisComplete,
                None,
                ANALYSIS_MILESTONE,
                "Analysis complete".into(),
                None,
            )
            .await;
        }

        results.duration_ms = started.elapsed().as_millis() as u64;
        let mut progress = run.progress;
        progress.current = total;
        progress.advance(100, "Scan completed");
        Ok((results, progress))
    }

    /// Port scan, service detection and threat lookup for one target.
    /// Returns the first hard failure.
    async fn scan_target(
        &self,
        run: &mut Run<'_>,
        index: usize,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProbeError> {
        let scan = run.scan;
        let total = scan.targets.len();
        let config = &scan.config;
        let options = PortScanOptions {
            stealth: config.stealth,
            timing: config.timing,
        };

        let discovered = self
            .scanner
            .port_scan(target, &config.ports, options, cancel)
            .await?;
        let mut open_ports: Vec<u16> = discovered.iter().map(|r| r.port).collect();
        open_ports.sort_unstable();
        open_ports.dedup();
        self.report(
            run,
            ScanPhase::PortScanComplete,
            Some(target),
            target_progress(index, total, 1),
            format!("Found {} open ports on {target}", discovered.len()),
            None,
        )
        .await;

        let wants_detection = config.scan_type.forces_service_detection()
            || (config.phases.service_detection && !open_ports.is_empty());
        let services = if wants_detection {
            let detection = self
                .scanner
                .service_detection(target, &open_ports, cancel)
                .await?;
            run.os.push(TargetOs {
                target: target.to_string(),
                os: detection.os.clone(),
            });
            let message = if detection.timed_out {
                format!("Service detection timed out on {target}")
            } else {
                format!("Identified {} services on {target}", detection.services.len())
            };
            self.report(
                run,
                ScanPhase::ServiceDetectionComplete,
                Some(target),
                target_progress(index, total, 2),
                message,
                None,
            )
            .await;
            merge_services(discovered, detection.services)
        } else {
            discovered
        };
        let indicators = intel_indicators(target, &services);
        run.services.extend(services);

        if config.phases.threat_intel {
            for indicator in &indicators {
                let kind = IndicatorKind::infer(indicator);
                let verdict = match self.intel.lookup(indicator, kind, cancel).await {
                    Ok(verdict) => verdict,
                    Err(IntelError::Cancelled) => return Err(ProbeError::Cancelled),
                    Err(e) => {
                        warn!(scan_id = %scan.id, indicator = %indicator, error = %e, "threat lookup failed");
                        continue;
                    }
                };
                if verdict.is_threat() && verdict.confidence > 0 {
                    self.record_threat(scan, verdict.clone()).await;
                    run.threats.push(verdict);
                }
            }
            self.report(
                run,
                ScanPhase::ThreatIntelComplete,
                Some(target),
                target_progress(index, total, 3),
                format!("Threat intelligence checked for {target}"),
                None,
            )
            .await;
        }

        run.progress.current = index + 1;
        Ok(())
    }

    async fn record_threat(&self, scan: &Scan, threat: ThreatIndicator) {
        {
            let store = self.store.lock().await;
            if let Err(e) = save_indicator(&store, &threat, scan.owner.as_deref(), now_ms()) {
                warn!(
                    scan_id = %scan.id,
                    indicator = %threat.indicator,
                    error = %e,
                    "failed to save threat indicator"
                );
            }
        }
        info!(
            scan_id = %scan.id,
            indicator = %threat.indicator,
            kind = %threat.threat_type,
            severity = %threat.severity,
            "threat detected"
        );
        self.sink.publish(ServerEvent::NewThreat {
            scan_id: Some(scan.id.clone()),
            threat: Box::new(threat),
        });
    }

    /// Advance progress, persist it (best effort) and publish it.
    async fn report(
        &self,
        run: &mut Run<'_>,
        phase: ScanPhase,
        target: Option<&str>,
        percentage: u8,
        message: String,
        error: Option<String>,
    ) {
        run.progress.advance(percentage, message);
        {
            let store = self.store.lock().await;
            if let Err(e) = store.update_progress(&run.scan.id, &run.progress) {
                warn!(scan_id = %run.scan.id, error = %e, "failed to persist progress");
            }
        }
        self.sink.publish(ServerEvent::ScanProgress {
            scan_id: run.scan.id.clone(),
            phase,
            target: target.map(str::to_string),
            progress: run.progress.clone(),
            error,
        });
    }

    async fn complete(&self, scan: &Scan, results: ScanResults, progress: Progress) -> ScanOutcome {
        let applied = {
            let store = self.store.lock().await;
            store.finalize_scan(
                &scan.id,
                ScanStatus::Completed,
                Some(&results),
                Some(&progress),
                None,
                now_ms(),
            )
        };
        match applied {
            Ok(true) => {
                info!(
                    scan_id = %scan.id,
                    findings = results.findings.len(),
                    risk_score = results.risk_score,
                    duration_ms = results.duration_ms,
                    "scan completed"
                );
                self.sink.publish(ServerEvent::ScanCompleted {
                    scan_id: scan.id.clone(),
                    results: Box::new(results.clone()),
                    owner: scan.owner.clone(),
                });
                ScanOutcome::Completed(Box::new(results))
            }
            // Someone else reached a terminal state first.
            Ok(false) => ScanOutcome::Cancelled,
            // The record is still running; retry as a failure without the
            // results blob so it does not wait for the restart sweep.
            Err(e) => {
                error!(scan_id = %scan.id, error = %e, "failed to persist scan results");
                self.fail(scan, &format!("failed to persist results: {e}"))
                    .await
            }
        }
    }

    /// Mark a scan failed and publish `scan-failed` if this call made the
    /// transition.
    pub async fn fail(&self, scan: &Scan, message: &str) -> ScanOutcome {
        let scan_id = scan.id.as_str();
        error!(scan_id, error = message, "scan failed");
        let applied = {
            let store = self.store.lock().await;
            store.finalize_scan(scan_id, ScanStatus::Failed, None, None, Some(message), now_ms())
        };
        match applied {
            Ok(false) => return ScanOutcome::Cancelled,
            Ok(true) => {}
            Err(e) => error!(scan_id, error = %e, "failed to persist scan failure"),
        }
        self.sink.publish(ServerEvent::ScanFailed {
            scan_id: scan_id.to_string(),
            error: message.to_string(),
            owner: scan.owner.clone(),
        });
        ScanOutcome::Failed(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::Protocol;

    fn record(port: u16, service: &str, version: &str) -> ServiceRecord {
        ServiceRecord {
            target: "10.0.0.5".into(),
            port,
            protocol: Protocol::Tcp,
            service: service.into(),
            version: version.into(),
            banner: None,
        }
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        for total in 1..=7 {
            let mut last = 0;
            for index in 0..total {
                for step in 1..=3 {
                    let pct = target_progress(index, total, step);
                    assert!(pct >= last, "total={total} index={index} step={step}");
                    last = pct;
                }
            }
            assert_eq!(last, 60);
            assert!(last < VULN_MILESTONE);
        }
    }

    #[test]
    fn single_target_thirds() {
        assert_eq!(target_progress(0, 1, 1), 20);
        assert_eq!(target_progress(0, 1, 2), 40);
        assert_eq!(target_progress(0, 1, 3), 60);
    }

    #[test]
    fn detected_records_replace_discovered() {
        let merged = merge_services(
            vec![record(22, "ssh", ""), record(80, "http", "")],
            vec![record(22, "ssh", "OpenSSH 6.6.1p1"), record(8080, "http-proxy", "")],
        );
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].version, "OpenSSH 6.6.1p1");
        assert_eq!(merged[1].port, 80);
        assert_eq!(merged[2].port, 8080);
    }

    #[test]
    fn same_port_on_two_hosts_survives_merge() {
        let host = |target: &str, version: &str| ServiceRecord {
            target: target.into(),
            ..record(22, "ssh", version)
        };
        let merged = merge_services(
            vec![host("10.0.0.1", ""), host("10.0.0.2", "")],
            vec![host("10.0.0.1", "OpenSSH 6.6"), host("10.0.0.2", "OpenSSH 9.6")],
        );
        let seen: Vec<(&str, &str)> = merged
            .iter()
            .map(|r| (r.target.as_str(), r.version.as_str()))
            .collect();
        assert_eq!(
            seen,
            vec![("10.0.0.1", "OpenSSH 6.6"), ("10.0.0.2", "OpenSSH 9.6")]
        );
    }

    #[test]
    fn network_blocks_look_up_discovered_hosts() {
        let services = vec![
            ServiceRecord {
                target: "10.0.0.1".into(),
                ..record(22, "ssh", "")
            },
            ServiceRecord {
                target: "10.0.0.1".into(),
                ..record(80, "http", "")
            },
            ServiceRecord {
                target: "10.0.0.2".into(),
                ..record(22, "ssh", "")
            },
        ];
        assert_eq!(
            intel_indicators("10.0.0.0/30", &services),
            vec!["10.0.0.1", "10.0.0.2"]
        );
        assert!(intel_indicators("10.9.0.0/30", &[]).is_empty());
        assert_eq!(intel_indicators("10.0.0.5", &services), vec!["10.0.0.5"]);
    }
}
