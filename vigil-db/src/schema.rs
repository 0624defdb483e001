use crate::error::DbError;

const SCHEMA_SQL: &str = r#"
-- One row per scan; nested structures are stored as JSON documents
CREATE TABLE IF NOT EXISTS scans (
    id             TEXT PRIMARY KEY,
    owner          TEXT,
    status         TEXT NOT NULL,
    targets_json   TEXT NOT NULL,
    config_json    TEXT NOT NULL,
    progress_json  TEXT NOT NULL,
    results_json   TEXT,
    error_message  TEXT,
    tags_json      TEXT NOT NULL DEFAULT '[]',
    created_at     INTEGER NOT NULL,
    started_at     INTEGER,
    completed_at   INTEGER
);
CREATE INDEX IF NOT EXISTS idx_scans_status ON scans(status);
CREATE INDEX IF NOT EXISTS idx_scans_owner ON scans(owner, created_at);

-- Merged threat-intel verdicts, one row per (indicator, source)
CREATE TABLE IF NOT EXISTS threat_indicators (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    indicator      TEXT NOT NULL,
    kind           TEXT NOT NULL,
    threat_type    TEXT NOT NULL,
    severity       TEXT NOT NULL,
    confidence     INTEGER NOT NULL,
    source         TEXT NOT NULL,
    metadata_json  TEXT NOT NULL DEFAULT '{}',
    owner          TEXT,
    first_seen     INTEGER NOT NULL,
    last_seen      INTEGER NOT NULL,
    UNIQUE(indicator, source)
);
CREATE INDEX IF NOT EXISTS idx_threat_last_seen ON threat_indicators(last_seen);
"#;

pub fn initialize(conn: &rusqlite::Connection) -> Result<(), DbError> {
    // WAL before DDL so the schema itself is written through the journal.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
