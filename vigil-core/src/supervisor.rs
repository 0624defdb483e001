// ---------------------------------------------------------------------------
// Scan supervision
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vigil_types::{Scan, ScanConfig, ScanStatus, ServerEvent, now_ms, validate_targets};

use crate::error::EngineError;
use crate::orchestrator::{Orchestrator, ScanOutcome};

/// Error message recorded on user cancellation.
pub const CANCELLED_BY_USER: &str = "Scan cancelled by user";

struct RunningScan {
    cancel: CancellationToken,
    handle: Option<JoinHandle<ScanOutcome>>,
}

/// Registry of scans currently executing in this process.
///
/// Each scan runs as its own task with its own cancellation token.
pub struct ScanSupervisor {
    orchestrator: Arc<Orchestrator>,
    running: Arc<Mutex<HashMap<String, RunningScan>>>,
}

fn lock(
    running: &Mutex<HashMap<String, RunningScan>>,
) -> MutexGuard<'_, HashMap<String, RunningScan>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScanSupervisor {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Validate the request, persist a `running` record and start the scan
    /// in the background. Returns as soon as the record exists.
    pub async fn start(
        &self,
        targets: &[String],
        config: ScanConfig,
        owner: Option<String>,
    ) -> Result<Scan, EngineError> {
        self.start_tagged(targets, config, owner, Vec::new()).await
    }

    pub async fn start_tagged(
        &self,
        targets: &[String],
        config: ScanConfig,
        owner: Option<String>,
        tags: Vec<String>,
    ) -> Result<Scan, EngineError> {
        let targets = validate_targets(targets)?;
        let mut scan = Scan::new(
            format!("scan-{}", uuid::Uuid::new_v4()),
            targets,
            config,
            owner,
            now_ms(),
        );
        scan.tags = tags;
        self.orchestrator.store().lock().await.insert_scan(&scan)?;

        let cancel = CancellationToken::new();
        let orchestrator = self.orchestrator.clone();
        let running = self.running.clone();
        let task_scan = scan.clone();
        let task_cancel = cancel.clone();

        // Hold the registry lock across the spawn so the task cannot
        // deregister before it is registered.
        {
            let mut registry = lock(&self.running);
            let handle = tokio::spawn(async move {
                let worker = {
                    let orchestrator = orchestrator.clone();
                    let task_scan = task_scan.clone();
                    tokio::spawn(async move {
                        orchestrator.perform_scan(&task_scan, &task_cancel).await
                    })
                };
                let outcome = match worker.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(scan_id = %task_scan.id, error = %e, "scan task aborted");
                        orchestrator
                            .fail(&task_scan, &format!("scan task aborted: {e}"))
                            .await
                    }
                };
                lock(&running).remove(&task_scan.id);
                outcome
            });
            registry.insert(
                scan.id.clone(),
                RunningScan {
                    cancel,
                    handle: Some(handle),
                },
            );
        }

        info!(
            scan_id = %scan.id,
            targets = scan.targets.len(),
            owner = ?scan.owner,
            "scan started"
        );
        Ok(scan)
    }

    /// Cancel a running scan on behalf of `requester`.
    ///
    /// The `cancelled` state is persisted first, then the scan's token is
    /// fired so in-flight tool runs and feed calls stop.
    pub async fn cancel(
        &self,
        scan_id: &str,
        requester: Option<&str>,
    ) -> Result<Scan, EngineError> {
        let scan = {
            let store = self.orchestrator.store().lock().await;
            let scan = store
                .load_scan(scan_id)?
                .ok_or_else(|| EngineError::NotFound(scan_id.to_string()))?;
            if !scan.is_owned_by(requester) {
                return Err(EngineError::Forbidden(scan_id.to_string()));
            }
            if scan.status.is_terminal() {
                return Err(EngineError::NotRunning {
                    id: scan_id.to_string(),
                    status: scan.status,
                });
            }
            let applied = store.finalize_scan(
                scan_id,
                ScanStatus::Cancelled,
                None,
                None,
                Some(CANCELLED_BY_USER),
                now_ms(),
            )?;
            let current = store
                .load_scan(scan_id)?
                .ok_or_else(|| EngineError::NotFound(scan_id.to_string()))?;
            if !applied {
                return Err(EngineError::NotRunning {
                    id: scan_id.to_string(),
                    status: current.status,
                });
            }
            current
        };

        match lock(&self.running).get(scan_id) {
            Some(entry) => entry.cancel.cancel(),
            None => warn!(scan_id, "cancelled scan had no live task"),
        }

        info!(scan_id, requester = ?requester, "scan cancelled");
        self.orchestrator.sink().publish(ServerEvent::ScanCancelled {
            scan_id: scan_id.to_string(),
            owner: scan.owner.clone(),
        });
        Ok(scan)
    }

    /// Wait for a scan's task to finish. `None` if the task already exited
    /// or someone else is waiting on it.
    pub async fn wait(&self, scan_id: &str) -> Option<ScanOutcome> {
        let handle = lock(&self.running)
            .get_mut(scan_id)
            .and_then(|entry| entry.handle.take())?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => Some(ScanOutcome::Failed(e.to_string())),
        }
    }

    pub fn is_running(&self, scan_id: &str) -> bool {
        lock(&self.running).contains_key(scan_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.running).len()
    }

    /// Stop every task without touching the records. Scans left `running`
    /// are failed by the next startup sweep.
    pub fn shutdown(&self) {
        let registry = lock(&self.running);
        for entry in registry.values() {
            entry.cancel.cancel();
        }
        if !registry.is_empty() {
            info!(scans = registry.len(), "stopping running scans");
        }
    }
}
