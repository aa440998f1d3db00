//! SQLite save sink
//!
//! Each harvest becomes one row in `harvests`, and every record one row in
//! `records` holding its raw JSON next to the few fields worth querying.

use crate::config::Endpoint;
use crate::crawler::HarvestOutcome;
use crate::output::traits::{OutputResult, SaveSink};
use crate::record::{created_utc, is_deleted};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// SQL schema for the output database
pub const SCHEMA_SQL: &str = r#"
-- One row per harvest
CREATE TABLE IF NOT EXISTS harvests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    finished_at TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    complete INTEGER NOT NULL,
    record_count INTEGER NOT NULL,
    elapsed_ms INTEGER NOT NULL
);

-- Records in harvest order
CREATE TABLE IF NOT EXISTS records (
    harvest_id INTEGER NOT NULL REFERENCES harvests(id),
    position INTEGER NOT NULL,
    record_id TEXT NOT NULL,
    created_utc INTEGER,
    deleted INTEGER NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (harvest_id, record_id)
);

CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_utc);
"#;

/// Saves harvests into a SQLite database
pub struct SqliteSink {
    conn: Connection,
    location: PathBuf,
    config_hash: String,
    endpoint: Endpoint,
}

impl SqliteSink {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Database file
    /// * `config_hash` - Hash of the configuration that produced the harvest
    /// * `endpoint` - Endpoint the records came from
    pub fn open(path: &Path, config_hash: &str, endpoint: Endpoint) -> OutputResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;
        Self::with_connection(conn, path.to_path_buf(), config_hash, endpoint)
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory(config_hash: &str, endpoint: Endpoint) -> OutputResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn, PathBuf::from(":memory:"), config_hash, endpoint)
    }

    fn with_connection(
        conn: Connection,
        location: PathBuf,
        config_hash: &str,
        endpoint: Endpoint,
    ) -> OutputResult<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn,
            location,
            config_hash: config_hash.to_string(),
            endpoint,
        })
    }
}

impl SaveSink for SqliteSink {
    fn save(&mut self, outcome: &HarvestOutcome) -> OutputResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO harvests (finished_at, config_hash, endpoint, complete, record_count, elapsed_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Utc::now().to_rfc3339(),
                self.config_hash,
                self.endpoint.path(),
                outcome.complete,
                outcome.records.len() as i64,
                outcome.stats.elapsed.as_millis() as i64,
            ],
        )?;
        let harvest_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO records (harvest_id, position, record_id, created_utc, deleted, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, (id, record)) in outcome.records.iter().enumerate() {
                let body = serde_json::to_string(record)?;
                stmt.execute(params![
                    harvest_id,
                    position as i64,
                    id,
                    created_utc(record),
                    is_deleted(record),
                    body,
                ])?;
            }
        }

        tx.commit()?;
        tracing::info!(
            "Saved {} records to {} as harvest {}",
            outcome.records.len(),
            self.location.display(),
            harvest_id
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("SQLite database {}", self.location.display())
    }
}
