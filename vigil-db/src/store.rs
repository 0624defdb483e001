use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use vigil_types::{
    IndicatorKind, Progress, Scan, ScanConfig, ScanResults, ScanStatus, Severity, ThreatIndicator,
    ThreatType,
};

use crate::error::DbError;
use crate::schema;

/// Persistent store for scans and threat indicators, backed by SQLite.
pub struct ScanStore {
    conn: Connection,
}

/// Whether an indicator save created a row or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

const SCAN_COLUMNS: &str = "id, owner, status, targets_json, config_json, progress_json, \
     results_json, error_message, tags_json, created_at, started_at, completed_at";

const INDICATOR_COLUMNS: &str = "indicator, kind, threat_type, severity, confidence, source, \
     metadata_json, first_seen, last_seen";

/// Raw scan row, decoded outside the rusqlite closure so JSON errors map
/// onto `DbError`.
struct ScanRow {
    id: String,
    owner: Option<String>,
    status: String,
    targets_json: String,
    config_json: String,
    progress_json: String,
    results_json: Option<String>,
    error_message: Option<String>,
    tags_json: String,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl ScanRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            status: row.get(2)?,
            targets_json: row.get(3)?,
            config_json: row.get(4)?,
            progress_json: row.get(5)?,
            results_json: row.get(6)?,
            error_message: row.get(7)?,
            tags_json: row.get(8)?,
            created_at: row.get(9)?,
            started_at: row.get(10)?,
            completed_at: row.get(11)?,
        })
    }

    fn into_scan(self) -> Result<Scan, DbError> {
        let status: ScanStatus = self.status.parse().map_err(|e| DbError::Corrupt {
            column: "status",
            reason: format!("{e}"),
        })?;
        let config: ScanConfig = serde_json::from_str(&self.config_json)?;
        let progress: Progress = serde_json::from_str(&self.progress_json)?;
        let results: Option<ScanResults> = self
            .results_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Scan {
            id: self.id,
            owner: self.owner,
            targets: serde_json::from_str(&self.targets_json)?,
            config,
            status,
            progress,
            results,
            error_message: self.error_message,
            tags: serde_json::from_str(&self.tags_json)?,
            created_at: self.created_at as u64,
            started_at: self.started_at.map(|t| t as u64),
            completed_at: self.completed_at.map(|t| t as u64),
        })
    }
}

struct IndicatorRow {
    indicator: String,
    kind: String,
    threat_type: String,
    severity: String,
    confidence: i64,
    source: String,
    metadata_json: String,
    first_seen: i64,
    last_seen: i64,
}

impl IndicatorRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            indicator: row.get(0)?,
            kind: row.get(1)?,
            threat_type: row.get(2)?,
            severity: row.get(3)?,
            confidence: row.get(4)?,
            source: row.get(5)?,
            metadata_json: row.get(6)?,
            first_seen: row.get(7)?,
            last_seen: row.get(8)?,
        })
    }

    fn into_indicator(self) -> Result<ThreatIndicator, DbError> {
        let corrupt = |column: &'static str| {
            move |e: vigil_types::TypeError| DbError::Corrupt {
                column,
                reason: e.to_string(),
            }
        };
        let kind: IndicatorKind = self.kind.parse().map_err(corrupt("kind"))?;
        let threat_type: ThreatType = self.threat_type.parse().map_err(corrupt("threat_type"))?;
        let severity: Severity = self.severity.parse().map_err(corrupt("severity"))?;
        Ok(ThreatIndicator {
            indicator: self.indicator,
            kind,
            threat_type,
            severity,
            confidence: self.confidence.clamp(0, 100) as u8,
            source: self.source,
            metadata: serde_json::from_str(&self.metadata_json)?,
            first_seen: self.first_seen as u64,
            last_seen: self.last_seen as u64,
        })
    }
}

fn default_db_path() -> PathBuf {
    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("vigil").join("vigil.db")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".vigil").join("vigil.db")
    }
}

impl ScanStore {
    /// Open (or create) the database at the default location.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(&default_db_path())
    }

    /// Open a database at a specific path.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Other(format!(
                    "failed to create db directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        debug!(path = %path.display(), "scan database opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Scans
    // -----------------------------------------------------------------------

    /// Insert a freshly created scan record.
    pub fn insert_scan(&self, scan: &Scan) -> Result<(), DbError> {
        self.conn.execute(
            &format!(
                "INSERT INTO scans ({SCAN_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                scan.id,
                scan.owner,
                scan.status.as_str(),
                serde_json::to_string(&scan.targets)?,
                serde_json::to_string(&scan.config)?,
                serde_json::to_string(&scan.progress)?,
                scan.results
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                scan.error_message,
                serde_json::to_string(&scan.tags)?,
                scan.created_at as i64,
                scan.started_at.map(|t| t as i64),
                scan.completed_at.map(|t| t as i64),
            ],
        )?;
        debug!(scan_id = %scan.id, targets = scan.targets.len(), "scan inserted");
        Ok(())
    }

    /// Load one scan by id.
    pub fn load_scan(&self, scan_id: &str) -> Result<Option<Scan>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = ?1"),
                params![scan_id],
                ScanRow::from_row,
            )
            .optional()?;
        row.map(ScanRow::into_scan).transpose()
    }

    /// Overwrite the progress of a scan that is still in flight.
    ///
    /// Returns false when the scan is missing or already terminal; late
    /// progress writes never touch a finished record.
    pub fn update_progress(&self, scan_id: &str, progress: &Progress) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE scans SET progress_json = ?2 \
             WHERE id = ?1 AND status IN ('scheduled', 'running')",
            params![scan_id, serde_json::to_string(progress)?],
        )?;
        Ok(changed > 0)
    }

    /// Move a scan into a terminal state.
    ///
    /// The write only applies while the scan is still `scheduled` or
    /// `running`, so the first terminal state wins and is never overwritten.
    /// Returns whether this call performed the transition.
    pub fn finalize_scan(
        &self,
        scan_id: &str,
        status: ScanStatus,
        results: Option<&ScanResults>,
        progress: Option<&Progress>,
        error_message: Option<&str>,
        completed_at: u64,
    ) -> Result<bool, DbError> {
        if !status.is_terminal() {
            return Err(DbError::Other(format!(
                "finalize_scan called with non-terminal status {status}"
            )));
        }
        let results_json = results.map(serde_json::to_string).transpose()?;
        let progress_json = progress.map(serde_json::to_string).transpose()?;
        let changed = self.conn.execute(
            "UPDATE scans SET status = ?2, \
             results_json = COALESCE(?3, results_json), \
             progress_json = COALESCE(?4, progress_json), \
             error_message = ?5, completed_at = ?6 \
             WHERE id = ?1 AND status IN ('scheduled', 'running')",
            params![
                scan_id,
                status.as_str(),
                results_json,
                progress_json,
                error_message,
                completed_at as i64,
            ],
        )?;
        debug!(scan_id, %status, applied = changed > 0, "scan finalized");
        Ok(changed > 0)
    }

    /// Scans still `running` or `scheduled`, newest first, optionally
    /// restricted to one owner.
    pub fn list_active(&self, owner: Option<&str>) -> Result<Vec<Scan>, DbError> {
        self.query_scans(
            &format!(
                "SELECT {SCAN_COLUMNS} FROM scans \
                 WHERE status IN ('scheduled', 'running') AND (?1 IS NULL OR owner = ?1) \
                 ORDER BY created_at DESC"
            ),
            params![owner],
        )
    }

    /// Scan history, newest first, optionally restricted to one owner.
    pub fn list_scans(
        &self,
        owner: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Scan>, DbError> {
        self.query_scans(
            &format!(
                "SELECT {SCAN_COLUMNS} FROM scans WHERE (?1 IS NULL OR owner = ?1) \
                 ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3"
            ),
            params![owner, limit as i64, offset as i64],
        )
    }

    /// Fail every scan a previous process left in flight. Called once at
    /// startup, before any new scan is accepted.
    pub fn fail_interrupted(&self, message: &str, now: u64) -> Result<usize, DbError> {
        let changed = self.conn.execute(
            "UPDATE scans SET status = 'failed', error_message = ?1, completed_at = ?2 \
             WHERE status IN ('scheduled', 'running')",
            params![message, now as i64],
        )?;
        Ok(changed)
    }

    fn query_scans(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Scan>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, ScanRow::from_row)?;
        let mut scans = Vec::new();
        for row in rows {
            scans.push(row?.into_scan()?);
        }
        Ok(scans)
    }

    // -----------------------------------------------------------------------
    // Threat indicators
    // -----------------------------------------------------------------------

    /// Save an indicator, deduplicated on `(indicator, source)`.
    ///
    /// An existing row keeps its `first_seen` and has every other field and
    /// `last_seen` refreshed. A new row gets `first_seen = last_seen = now`.
    pub fn upsert_indicator(
        &self,
        indicator: &ThreatIndicator,
        owner: Option<&str>,
        now: u64,
    ) -> Result<UpsertOutcome, DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM threat_indicators WHERE indicator = ?1 AND source = ?2",
                params![indicator.indicator, indicator.source],
                |row| row.get(0),
            )
            .optional()?;

        let metadata_json = serde_json::to_string(&indicator.metadata)?;
        let outcome = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE threat_indicators SET kind = ?2, threat_type = ?3, severity = ?4, \
                     confidence = ?5, metadata_json = ?6, last_seen = ?7 WHERE id = ?1",
                    params![
                        id,
                        indicator.kind.as_str(),
                        indicator.threat_type.as_str(),
                        indicator.severity.as_str(),
                        indicator.confidence as i64,
                        metadata_json,
                        now as i64,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    "INSERT INTO threat_indicators (indicator, kind, threat_type, severity, \
                     confidence, source, metadata_json, owner, first_seen, last_seen) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    params![
                        indicator.indicator,
                        indicator.kind.as_str(),
                        indicator.threat_type.as_str(),
                        indicator.severity.as_str(),
                        indicator.confidence as i64,
                        indicator.source,
                        metadata_json,
                        owner,
                        now as i64,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };
        tx.commit()?;
        debug!(
            indicator = %indicator.indicator,
            source = %indicator.source,
            ?outcome,
            "threat indicator saved"
        );
        Ok(outcome)
    }

    pub fn find_indicator(
        &self,
        indicator: &str,
        source: &str,
    ) -> Result<Option<ThreatIndicator>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {INDICATOR_COLUMNS} FROM threat_indicators \
                     WHERE indicator = ?1 AND source = ?2"
                ),
                params![indicator, source],
                IndicatorRow::from_row,
            )
            .optional()?;
        row.map(IndicatorRow::into_indicator).transpose()
    }

    /// Stored indicators, most recently seen first.
    pub fn list_indicators(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ThreatIndicator>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INDICATOR_COLUMNS} FROM threat_indicators \
             ORDER BY last_seen DESC, id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], IndicatorRow::from_row)?;
        let mut indicators = Vec::new();
        for row in rows {
            indicators.push(row?.into_indicator()?);
        }
        Ok(indicators)
    }

    pub fn count_indicators(&self) -> Result<u64, DbError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM threat_indicators", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::{Finding, SeveritySummary};

    fn running_scan(id: &str, owner: Option<&str>, created_at: u64) -> Scan {
        Scan::new(
            id.into(),
            vec!["10.0.0.5".into()],
            ScanConfig::default(),
            owner.map(String::from),
            created_at,
        )
    }

    fn indicator(source: &str, severity: Severity) -> ThreatIndicator {
        ThreatIndicator {
            indicator: "203.0.113.9".into(),
            kind: IndicatorKind::Ip,
            threat_type: ThreatType::Malware,
            severity,
            confidence: 80,
            source: source.into(),
            metadata: serde_json::Map::new(),
            first_seen: 0,
            last_seen: 0,
        }
    }

    #[test]
    fn insert_and_load_scan() {
        let store = ScanStore::open_in_memory().unwrap();
        let scan = running_scan("scan-1", Some("alice"), 1000);
        store.insert_scan(&scan).unwrap();

        let loaded = store.load_scan("scan-1").unwrap().unwrap();
        assert_eq!(loaded, scan);
        assert!(store.load_scan("missing").unwrap().is_none());
    }

    #[test]
    fn finalize_is_first_writer_wins() {
        let store = ScanStore::open_in_memory().unwrap();
        store.insert_scan(&running_scan("s", None, 1)).unwrap();

        assert!(
            store
                .finalize_scan(
                    "s",
                    ScanStatus::Cancelled,
                    None,
                    None,
                    Some("Scan cancelled by user"),
                    50
                )
                .unwrap()
        );
        let results = ScanResults {
            risk_score: 90,
            ..Default::default()
        };
        assert!(
            !store
                .finalize_scan("s", ScanStatus::Completed, Some(&results), None, None, 60)
                .unwrap()
        );

        let loaded = store.load_scan("s").unwrap().unwrap();
        assert_eq!(loaded.status, ScanStatus::Cancelled);
        assert_eq!(loaded.completed_at, Some(50));
        assert_eq!(
            loaded.error_message.as_deref(),
            Some("Scan cancelled by user")
        );
        assert!(loaded.results.is_none());
    }

    #[test]
    fn finalize_rejects_non_terminal_status() {
        let store = ScanStore::open_in_memory().unwrap();
        store.insert_scan(&running_scan("s", None, 1)).unwrap();
        assert!(
            store
                .finalize_scan("s", ScanStatus::Running, None, None, None, 2)
                .is_err()
        );
    }

    #[test]
    fn progress_writes_stop_after_terminal() {
        let store = ScanStore::open_in_memory().unwrap();
        store.insert_scan(&running_scan("s", None, 1)).unwrap();

        let mut progress = Progress::new(1);
        progress.advance(20, "port scan complete");
        assert!(store.update_progress("s", &progress).unwrap());

        let finding = Finding {
            finding_type: "legacy-ssh".into(),
            severity: Severity::Critical,
            confidence: 90,
            title: "t".into(),
            description: "d".into(),
            cves: vec!["CVE-2016-0777".into()],
            evidence: "OpenSSH 6.6".into(),
            remediation: "upgrade".into(),
            tags: vec![],
            location: "22/tcp".into(),
            target: "10.0.0.5".into(),
        };
        let results = ScanResults {
            summary: SeveritySummary::from_findings(std::slice::from_ref(&finding)),
            findings: vec![finding],
            risk_score: 70,
            ..Default::default()
        };
        progress.advance(100, "done");
        store
            .finalize_scan(
                "s",
                ScanStatus::Completed,
                Some(&results),
                Some(&progress),
                None,
                9,
            )
            .unwrap();

        progress.advance(100, "stale");
        assert!(!store.update_progress("s", &progress).unwrap());
        let loaded = store.load_scan("s").unwrap().unwrap();
        assert_eq!(loaded.progress.message, "done");
        assert_eq!(loaded.results.unwrap().risk_score, 70);
    }

    #[test]
    fn active_and_history_filter_by_owner() {
        let store = ScanStore::open_in_memory().unwrap();
        store.insert_scan(&running_scan("a1", Some("alice"), 1)).unwrap();
        store.insert_scan(&running_scan("a2", Some("alice"), 2)).unwrap();
        store.insert_scan(&running_scan("b1", Some("bob"), 3)).unwrap();
        store
            .finalize_scan("a1", ScanStatus::Failed, None, None, Some("boom"), 5)
            .unwrap();

        let active: Vec<String> = store
            .list_active(Some("alice"))
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(active, vec!["a2"]);
        assert_eq!(store.list_active(None).unwrap().len(), 2);

        let history: Vec<String> = store
            .list_scans(None, 10, 0)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(history, vec!["b1", "a2", "a1"]);
        assert_eq!(store.list_scans(None, 1, 1).unwrap()[0].id, "a2");
    }

    #[test]
    fn fail_interrupted_marks_in_flight_scans() {
        let store = ScanStore::open_in_memory().unwrap();
        store.insert_scan(&running_scan("s1", None, 1)).unwrap();
        store.insert_scan(&running_scan("s2", None, 2)).unwrap();
        store
            .finalize_scan("s2", ScanStatus::Completed, None, None, None, 3)
            .unwrap();

        assert_eq!(store.fail_interrupted("server restarted", 10).unwrap(), 1);
        let s1 = store.load_scan("s1").unwrap().unwrap();
        assert_eq!(s1.status, ScanStatus::Failed);
        assert_eq!(s1.error_message.as_deref(), Some("server restarted"));
    }

    #[test]
    fn upsert_indicator_deduplicates_on_source() {
        let store = ScanStore::open_in_memory().unwrap();

        let first = store
            .upsert_indicator(&indicator("otx", Severity::Medium), Some("alice"), 100)
            .unwrap();
        assert_eq!(first, UpsertOutcome::Inserted);

        let second = store
            .upsert_indicator(&indicator("otx", Severity::Critical), Some("alice"), 200)
            .unwrap();
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(store.count_indicators().unwrap(), 1);

        let stored = store.find_indicator("203.0.113.9", "otx").unwrap().unwrap();
        assert_eq!(stored.first_seen, 100);
        assert_eq!(stored.last_seen, 200);
        assert_eq!(stored.severity, Severity::Critical);

        store
            .upsert_indicator(&indicator("virustotal", Severity::High), None, 300)
            .unwrap();
        assert_eq!(store.count_indicators().unwrap(), 2);
        let listed = store.list_indicators(10, 0).unwrap();
        assert_eq!(listed[0].source, "virustotal");
    }

    #[test]
    fn open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vigil.db");
        {
            let store = ScanStore::open(&path).unwrap();
            store.insert_scan(&running_scan("disk", None, 1)).unwrap();
        }
        let store = ScanStore::open(&path).unwrap();
        assert!(store.load_scan("disk").unwrap().is_some());
    }
}
