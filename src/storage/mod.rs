//! Append-only storage for anomalies and summaries.
//!
//! Writers only append and readers only scan, newest entry first. The SQLite
//! backend is what the daemon runs on; [`memory`] backs tests and offline
//! runs.

pub mod memory;
pub mod schema;

use anyhow::{Context, Result};
use chrono::Utc;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

pub use self::memory::{MemoryLog, MemoryMarkers};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Key of the freshness marker written by reading sources.
pub const LAST_DATA_RECEIVED: &str = "last_data_received";

/// An append-only list of JSON entries.
pub trait AppendLog: Send + Sync {
    fn append(&self, entry: &str) -> Result<()>;

    /// Up to `limit` entries, most recent first.
    fn recent(&self, limit: usize) -> Result<Vec<String>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Small key/value markers such as the data stream freshness timestamp.
pub trait MarkerStore: Send + Sync {
    fn set_marker(&self, key: &str, value: &str) -> Result<()>;
    fn marker(&self, key: &str) -> Result<Option<String>>;
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Which log table a [`SqliteLog`] writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTable {
    Anomalies,
    Summaries,
}

impl LogTable {
    fn name(&self) -> &'static str {
        match self {
            LogTable::Anomalies => "anomaly_log",
            LogTable::Summaries => "summary_log",
        }
    }
}

#[derive(Clone)]
pub struct SqliteLog {
    pool: Pool,
    table: LogTable,
}

impl SqliteLog {
    pub fn new(pool: Pool, table: LogTable) -> Self {
        Self { pool, table }
    }
}

impl AppendLog for SqliteLog {
    fn append(&self, entry: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (payload_json, created_at) VALUES (?1, ?2)",
                self.table.name()
            ),
            params![entry, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("failed to append to {}", self.table.name()))?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT payload_json FROM {} ORDER BY id DESC LIMIT ?1",
            self.table.name()
        ))?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;

        let mut entries = Vec::new();
        for r in rows {
            entries.push(r?);
        }
        Ok(entries)
    }

    fn len(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table.name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[derive(Clone)]
pub struct SqliteMarkers {
    pool: Pool,
}

impl SqliteMarkers {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl MarkerStore for SqliteMarkers {
    fn set_marker(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO markers (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )
        .context("failed to write marker")?;
        Ok(())
    }

    fn marker(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                "SELECT value FROM markers WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flowwatch.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    #[test]
    fn test_log_reads_most_recent_first() {
        let (_dir, pool) = pool();
        let log = SqliteLog::new(pool, LogTable::Anomalies);
        for i in 0..5 {
            log.append(&format!("{{\"n\":{i}}}")).unwrap();
        }

        assert_eq!(log.len().unwrap(), 5);
        assert_eq!(log.recent(2).unwrap(), vec![r#"{"n":4}"#, r#"{"n":3}"#]);
        assert_eq!(log.recent(100).unwrap().len(), 5);
    }

    #[test]
    fn test_tables_are_separate() {
        let (_dir, pool) = pool();
        let anomalies = SqliteLog::new(pool.clone(), LogTable::Anomalies);
        let summaries = SqliteLog::new(pool, LogTable::Summaries);

        anomalies.append("{}").unwrap();
        assert!(summaries.is_empty().unwrap());
        assert!(!anomalies.is_empty().unwrap());
    }

    #[test]
    fn test_markers_upsert() {
        let (_dir, pool) = pool();
        let markers = SqliteMarkers::new(pool);

        assert_eq!(markers.marker(LAST_DATA_RECEIVED).unwrap(), None);
        markers.set_marker(LAST_DATA_RECEIVED, "a").unwrap();
        markers.set_marker(LAST_DATA_RECEIVED, "b").unwrap();
        assert_eq!(markers.marker(LAST_DATA_RECEIVED).unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_open_pool_creates_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/fw.db");
        open_pool(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
    }
}
