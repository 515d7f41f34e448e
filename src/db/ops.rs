// src/db/ops.rs

//! Store-level operations exposed alongside the driver: health, backup,
//! optimize, stats.

use std::path::Path;

use rusqlite::backup::{Backup, StepResult};
use tracing::info;

use super::schema::REQUIRED_TABLES;
use super::StorageDriver;
use crate::db::migrations::MigrationEngine;
use crate::db::recorder::RecorderMetrics;
use crate::error::Result;

/// Combined liveness/consistency view.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub active: bool,
    pub schema_version: i64,
    pub issues: Vec<String>,
    pub metrics: RecorderMetrics,
}

/// Page-level and per-table counts.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub page_count: i64,
    pub freelist_count: i64,
    pub page_size: i64,
    pub table_rows: Vec<(String, i64)>,
}

impl StorageDriver {
    /// A connection that can still prepare a statement is active; combine
    /// that with [`MigrationEngine::verify_integrity`] and a snapshot of
    /// the query recorder's metrics.
    pub fn health(&self) -> HealthReport {
        let active = self.connection().query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok();
        let engine = MigrationEngine::new(self.connection());
        let schema_version = engine.current_version().unwrap_or(0);
        let issues = match engine.verify_integrity() {
            Ok(report) => report.errors,
            Err(e) => vec![format!("verify_integrity failed: {e}")],
        };
        HealthReport {
            active,
            schema_version,
            issues,
            metrics: self.recorder().metrics(),
        }
    }

    /// Snapshot the live store to `dest` using SQLite's own backup API —
    /// safe to run against a database under concurrent use.
    pub fn backup_to_path(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut dest_conn = rusqlite::Connection::open(dest)?;
        let backup = Backup::new(self.connection(), &mut dest_conn)?;
        loop {
            match backup.step(100)? {
                StepResult::Done => break,
                StepResult::More => continue,
                StepResult::Busy | StepResult::Locked => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
        info!("backed up store to {}", dest.display());
        Ok(())
    }

    /// Run the query planner's own housekeeping pragma, plus an
    /// incremental vacuum step when the store opted into
    /// `auto_vacuum = INCREMENTAL`.
    pub fn optimize(&self) -> Result<()> {
        self.connection().execute_batch("PRAGMA optimize;")?;
        if self.config().pragmas.auto_vacuum.eq_ignore_ascii_case("incremental") {
            self.connection().execute_batch("PRAGMA incremental_vacuum;")?;
        }
        Ok(())
    }

    /// Page accounting plus a row count for every table the schema
    /// requires.
    pub fn stats(&self) -> Result<StatsReport> {
        let page_count: i64 = self.connection().query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let freelist_count: i64 = self.connection().query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
        let page_size: i64 = self.connection().query_row("PRAGMA page_size", [], |row| row.get(0))?;

        let mut table_rows = Vec::with_capacity(REQUIRED_TABLES.len());
        for table in REQUIRED_TABLES {
            if *table == "schema_version" || *table == "search_index" {
                continue;
            }
            let count: i64 = self
                .connection()
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap_or(0);
            table_rows.push((table.to_string(), count));
        }

        Ok(StatsReport {
            page_count,
            freelist_count,
            page_size,
            table_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;
    use crate::db::migrations::MigrationEngine;
    use tempfile::NamedTempFile;

    fn setup() -> StorageDriver {
        let driver = StorageDriver::open(Preset::Testing.config()).unwrap();
        MigrationEngine::new(driver.connection()).migrate().unwrap();
        driver
    }

    #[test]
    fn health_reports_active_and_current_schema_version() {
        let driver = setup();
        let health = driver.health();
        assert!(health.active);
        assert_eq!(health.schema_version, 2);
        assert!(health.issues.is_empty(), "{:?}", health.issues);
    }

    #[test]
    fn stats_counts_every_required_table() {
        let driver = setup();
        let stats = driver.stats().unwrap();
        assert!(stats.table_rows.iter().any(|(t, _)| t == "nodes"));
        assert!(stats.table_rows.iter().any(|(t, _)| t == "hierarchy_edges"));
        assert!(stats.page_count > 0);
    }

    #[test]
    fn backup_to_path_produces_a_restorable_copy() {
        let driver = setup();
        driver
            .connection()
            .execute_batch("CREATE TABLE IF NOT EXISTS probe (id INTEGER)")
            .unwrap();
        driver.run("INSERT INTO probe (id) VALUES (?1)", [1]).unwrap();

        let file = NamedTempFile::new().unwrap();
        driver.backup_to_path(file.path()).unwrap();

        let copy = rusqlite::Connection::open(file.path()).unwrap();
        let count: i64 = copy.query_row("SELECT COUNT(*) FROM probe", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn optimize_runs_without_error() {
        let driver = setup();
        driver.optimize().unwrap();
    }
}
