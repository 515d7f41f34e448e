// src/db/mod.rs

//! Storage driver for kbgraph.
//!
//! Owns the connection to the embedded SQLite store, applies tuning
//! pragmas on open, classifies and times every statement through the
//! [`recorder`], and hands out serializable write transactions through
//! the [`transaction`] manager.

pub mod migrations;
pub mod models;
pub mod ops;
pub mod recorder;
pub mod schema;
pub mod transaction;

use std::path::Path;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use recorder::{OperationType, QueryRecorder};
use transaction::TransactionManager;

/// Opened handle to the embedded store plus its instrumentation.
///
/// This is an explicit handle passed to callers — there is no hidden
/// process-wide singleton. A host that wants a shared instance constructs
/// one at startup and plumbs it through.
pub struct StorageDriver {
    conn: Connection,
    config: Config,
    recorder: QueryRecorder,
}

impl StorageDriver {
    /// Open (creating if necessary) the store named by `config.path`,
    /// applying tuning pragmas before any transaction runs.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let conn = if config.memory || config.path == crate::config::MEMORY_SENTINEL {
            debug!("opening in-memory store");
            Connection::open_in_memory()
                .map_err(|e| Error::Connection(format!("failed to open in-memory store: {e}")))?
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            debug!("opening store at {}", config.path);
            if config.read_only {
                Connection::open_with_flags(
                    &config.path,
                    rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
                )
                .map_err(|e| Error::Connection(format!("failed to open {}: {e}", config.path)))?
            } else {
                Connection::open(&config.path)
                    .map_err(|e| Error::Connection(format!("failed to open {}: {e}", config.path)))?
            }
        };

        conn.busy_timeout(std::time::Duration::from_millis(config.timeout_ms))?;
        for stmt in config.pragmas.as_statements() {
            conn.execute_batch(&stmt)
                .map_err(|e| Error::Connection(format!("applying `{stmt}`: {e}")))?;
        }

        info!("storage driver opened: {}", config);
        Ok(StorageDriver {
            conn,
            config,
            recorder: QueryRecorder::new(),
        })
    }

    /// Borrow the underlying connection for call sites (graph ops, import
    /// pipeline) that need direct `rusqlite` access within this driver's
    /// instrumentation boundary.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recorder(&self) -> &QueryRecorder {
        &self.recorder
    }

    /// Run a read query, recording its timing and classification.
    pub fn query<T, P, F>(&self, sql: &str, params: P, row_fn: F) -> Result<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let start = std::time::Instant::now();
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| crate::error::query_error(sql, e))?;
        let rows = stmt
            .query_map(params, row_fn)
            .map_err(|e| crate::error::query_error(sql, e))?
            .collect::<std::result::Result<Vec<T>, rusqlite::Error>>()
            .map_err(|e| crate::error::query_error(sql, e))?;
        let affected = rows.len();
        self.recorder
            .record(sql, classify(sql), affected, start.elapsed());
        Ok(rows)
    }

    /// Run a write statement, recording its timing and classification.
    pub fn run(&self, sql: &str, params: impl rusqlite::Params) -> Result<RunResult> {
        let start = std::time::Instant::now();
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| crate::error::query_error(sql, e))?;
        let changes = stmt
            .execute(params)
            .map_err(|e| crate::error::query_error(sql, e))?;
        let last_insert_id = self.conn.last_insert_rowid();
        self.recorder
            .record(sql, classify(sql), changes, start.elapsed());
        Ok(RunResult {
            changes,
            last_insert_id,
        })
    }

    /// Run `body` inside a serializable write transaction.
    pub fn transaction<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut mgr = TransactionManager::new(&self.conn);
        mgr.begin()?;
        match body() {
            Ok(value) => {
                mgr.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = mgr.rollback();
                Err(e)
            }
        }
    }

    /// Close the driver, dropping the underlying connection.
    pub fn close(self) {
        info!("storage driver closed");
        drop(self.conn);
    }
}

/// Outcome of [`StorageDriver::run`].
#[derive(Debug, Clone, Copy)]
pub struct RunResult {
    pub changes: usize,
    pub last_insert_id: i64,
}

/// Derive the operation type and target table from a SQL statement by
/// recognizing its leading clause.
pub fn classify(sql: &str) -> (OperationType, Option<String>) {
    let trimmed = sql.trim_start();
    let upper_prefix: String = trimmed
        .chars()
        .take(64)
        .collect::<String>()
        .to_ascii_uppercase();

    let op = if upper_prefix.starts_with("SELECT") || upper_prefix.starts_with("WITH") {
        OperationType::Query
    } else if upper_prefix.starts_with("INSERT") {
        OperationType::Insert
    } else if upper_prefix.starts_with("UPDATE") {
        OperationType::Update
    } else if upper_prefix.starts_with("DELETE") {
        OperationType::Delete
    } else {
        OperationType::Query
    };

    let table = extract_table(trimmed);
    (op, table)
}

fn extract_table(sql: &str) -> Option<String> {
    let upper = sql.to_ascii_uppercase();
    for marker in ["FROM", "INTO", "UPDATE", "JOIN", "CREATE TABLE"] {
        if let Some(idx) = upper.find(marker) {
            let rest = sql[idx + marker.len()..].trim_start();
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() {
                return Some(name.trim_matches('"').to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;

    #[test]
    fn open_in_memory_applies_pragmas() {
        let driver = StorageDriver::open(Preset::Testing.config()).unwrap();
        let fk: i64 = driver
            .connection()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1, "foreign_keys defaults on in the pragma map");
    }

    #[test]
    fn classify_recognizes_statement_kinds() {
        assert_eq!(classify("SELECT * FROM nodes").0, OperationType::Query);
        assert_eq!(
            classify("INSERT INTO nodes (id) VALUES (?1)").0,
            OperationType::Insert
        );
        assert_eq!(classify("UPDATE nodes SET name = ?1").0, OperationType::Update);
        assert_eq!(classify("DELETE FROM nodes WHERE id = ?1").0, OperationType::Delete);
        assert_eq!(
            extract_table("INSERT INTO hierarchy_edges (parent_id) VALUES (?1)"),
            Some("hierarchy_edges".to_string())
        );
    }

    #[test]
    fn run_and_query_roundtrip() {
        let driver = StorageDriver::open(Preset::Testing.config()).unwrap();
        driver
            .connection()
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)")
            .unwrap();
        driver.run("INSERT INTO t (v) VALUES (?1)", ["hello"]).unwrap();
        let rows: Vec<String> = driver
            .query("SELECT v FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, vec!["hello".to_string()]);
    }
}
