// src/db/migrations.rs

//! Migration engine: version detection, forward/backward migrations with
//! checksum verification, and post-migration integrity checks.

use std::collections::BTreeMap;
use std::time::Instant;

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::db::schema::{self, REQUIRED_TABLES, REQUIRED_TRIGGERS};
use crate::error::{Error, Result};

/// A single versioned migration.
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

impl Migration {
    /// SHA-256 of the `up` statements joined by newline, lowercase hex.
    pub fn checksum(&self) -> String {
        checksum_of(self.up)
    }
}

fn checksum_of(statements: &[&str]) -> String {
    let joined = statements.join("\n");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

/// Minimal hex encoder so we don't pull in a dedicated crate for eight
/// bytes-to-string calls; kept private to this module.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

/// The built-in migration chain; current schema version is 2.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "baseline schema: nodes, hierarchy, references, stats, imports, search index",
            up: schema::MIGRATION_V1_UP,
            down: schema::MIGRATION_V1_DOWN,
        },
        Migration {
            version: 2,
            description: "performance indexes",
            up: schema::MIGRATION_V2_UP,
            down: schema::MIGRATION_V2_DOWN,
        },
    ]
}

/// Outcome of applying or rolling back a single migration.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub version: i64,
    pub success: bool,
    pub duration_ms: u64,
}

/// Result of [`MigrationEngine::verify_integrity`].
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub checks: BTreeMap<String, bool>,
}

/// Drives schema evolution for one connection.
pub struct MigrationEngine<'c> {
    conn: &'c Connection,
    migrations: Vec<Migration>,
}

impl<'c> MigrationEngine<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        MigrationEngine {
            conn,
            migrations: all_migrations(),
        }
    }

    fn ensure_version_table(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY CHECK(version > 0),
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                checksum TEXT NOT NULL CHECK(length(checksum) = 64)
            )",
        )?;
        Ok(())
    }

    /// Max applied version, or 0 if the version table is missing.
    pub fn current_version(&self) -> Result<i64> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(0);
        }
        let version: Option<i64> =
            self.conn
                .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }

    /// Migrations with version > current, ascending.
    pub fn pending(&self) -> Result<Vec<&Migration>> {
        let current = self.current_version()?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| m.version > current)
            .collect())
    }

    fn stored_checksum(&self, version: i64) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT checksum FROM schema_version WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::from(other)),
            })
    }

    /// Apply one migration inside a transaction.
    pub fn apply(&self, m: &Migration) -> Result<MigrationResult> {
        self.ensure_version_table()?;

        if let Some(stored) = self.stored_checksum(m.version)? {
            let defined = m.checksum();
            if stored != defined {
                return Err(Error::SchemaVersion(format!(
                    "migration v{} checksum mismatch: stored {} != defined {}",
                    m.version, stored, defined
                )));
            }
        }

        let start = Instant::now();
        self.conn.execute_batch("BEGIN IMMEDIATE")?;

        for stmt in m.up {
            let trimmed = stmt.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Err(e) = self.conn.execute_batch(trimmed) {
                let _ = self.conn.execute_batch("ROLLBACK");
                return Err(Error::Query {
                    sql: trimmed.to_string(),
                    source: e,
                });
            }
        }

        let checksum = m.checksum();
        if let Err(e) = self.conn.execute(
            "INSERT OR REPLACE INTO schema_version (version, description, applied_at, checksum)
             VALUES (?1, ?2, CURRENT_TIMESTAMP, ?3)",
            rusqlite::params![m.version, m.description, checksum],
        ) {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(Error::from(e));
        }

        self.conn.execute_batch("COMMIT")?;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!("applied migration v{}: {}", m.version, m.description);
        Ok(MigrationResult {
            version: m.version,
            success: true,
            duration_ms,
        })
    }

    /// Roll a single migration back inside a transaction.
    pub fn rollback(&self, m: &Migration) -> Result<MigrationResult> {
        let start = Instant::now();
        self.conn.execute_batch("BEGIN IMMEDIATE")?;

        for stmt in m.down {
            let trimmed = stmt.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Err(e) = self.conn.execute_batch(trimmed) {
                let _ = self.conn.execute_batch("ROLLBACK");
                return Err(Error::Query {
                    sql: trimmed.to_string(),
                    source: e,
                });
            }
        }

        if let Err(e) = self
            .conn
            .execute("DELETE FROM schema_version WHERE version = ?1", [m.version])
        {
            let _ = self.conn.execute_batch("ROLLBACK");
            return Err(Error::from(e));
        }

        self.conn.execute_batch("COMMIT")?;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!("rolled back migration v{}: {}", m.version, m.description);
        Ok(MigrationResult {
            version: m.version,
            success: true,
            duration_ms,
        })
    }

    /// Apply all pending migrations in order; stop on first failure.
    pub fn migrate(&self) -> Result<Vec<MigrationResult>> {
        self.ensure_version_table()?;
        let mut results = Vec::new();
        for m in self.pending()? {
            debug!("applying pending migration v{}", m.version);
            results.push(self.apply(m)?);
        }
        Ok(results)
    }

    /// Roll back to `target`, which must be strictly less than current.
    pub fn rollback_to(&self, target: i64) -> Result<Vec<MigrationResult>> {
        let current = self.current_version()?;
        if target >= current {
            return Err(Error::SchemaVersion(format!(
                "rollback target {} must be strictly less than current version {}",
                target, current
            )));
        }

        let mut to_rollback: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| m.version > target && m.version <= current)
            .collect();
        to_rollback.sort_by(|a, b| b.version.cmp(&a.version));

        let mut results = Vec::new();
        for m in to_rollback {
            results.push(self.rollback(m)?);
        }
        Ok(results)
    }

    /// Store-level integrity check, FK audit, and presence of every
    /// required table and trigger.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let mut errors = Vec::new();
        let mut checks = BTreeMap::new();

        let integrity_ok = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get::<_, String>(0))
            .map(|r| r == "ok")
            .unwrap_or(false);
        checks.insert("integrity_check".to_string(), integrity_ok);
        if !integrity_ok {
            errors.push("PRAGMA integrity_check did not report ok".to_string());
        }

        let fk_violations: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pragma_foreign_key_check", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
        let fk_ok = fk_violations == 0;
        checks.insert("foreign_key_audit".to_string(), fk_ok);
        if !fk_ok {
            errors.push(format!("{} foreign key violation(s) found", fk_violations));
        }

        for table in REQUIRED_TABLES {
            let present: bool = self
                .conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1)",
                    [table],
                    |row| row.get(0),
                )
                .unwrap_or(false);
            checks.insert(format!("table:{table}"), present);
            if !present {
                errors.push(format!("required table `{table}` is missing"));
            }
        }

        for trigger in REQUIRED_TRIGGERS {
            let present: bool = self
                .conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'trigger' AND name = ?1)",
                    [trigger],
                    |row| row.get(0),
                )
                .unwrap_or(false);
            checks.insert(format!("trigger:{trigger}"), present);
            if !present {
                errors.push(format!("required trigger `{trigger}` is missing"));
            }
        }

        // Every applied version's stored checksum must match its definition.
        for m in &self.migrations {
            if let Some(stored) = self.stored_checksum(m.version)? {
                let matches = stored == m.checksum();
                checks.insert(format!("checksum:v{}", m.version), matches);
                if !matches {
                    errors.push(format!(
                        "migration v{} stored checksum does not match its definition",
                        m.version
                    ));
                }
            }
        }

        if !errors.is_empty() {
            warn!("verify_integrity found {} issue(s)", errors.len());
        }

        Ok(IntegrityReport {
            ok: errors.is_empty(),
            errors,
            checks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn empty_bootstrap_reaches_version_2() {
        let conn = open();
        let engine = MigrationEngine::new(&conn);
        engine.migrate().unwrap();
        assert_eq!(engine.current_version().unwrap(), 2);
        let report = engine.verify_integrity().unwrap();
        assert!(report.ok, "{:?}", report.errors);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = open();
        let engine = MigrationEngine::new(&conn);
        engine.migrate().unwrap();
        let results = engine.migrate().unwrap();
        assert!(results.is_empty());
        assert_eq!(engine.current_version().unwrap(), 2);
    }

    #[test]
    fn rollback_to_removes_v2_indexes() {
        let conn = open();
        let engine = MigrationEngine::new(&conn);
        engine.migrate().unwrap();
        engine.rollback_to(1).unwrap();
        assert_eq!(engine.current_version().unwrap(), 1);

        let idx_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_nodes_owner'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(idx_count, 0);

        // Tables from migration 1 remain.
        let table_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'nodes'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(table_count, 1);

        // Re-migrating restores v2 with the same checksum.
        engine.migrate().unwrap();
        assert_eq!(engine.current_version().unwrap(), 2);
    }

    #[test]
    fn rollback_to_current_or_above_is_rejected() {
        let conn = open();
        let engine = MigrationEngine::new(&conn);
        engine.migrate().unwrap();
        assert!(engine.rollback_to(2).is_err());
        assert!(engine.rollback_to(5).is_err());
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let conn = open();
        let engine = MigrationEngine::new(&conn);
        engine.migrate().unwrap();
        conn.execute(
            "UPDATE schema_version SET checksum = 'deadbeef' || substr(checksum, 9) WHERE version = 1",
            [],
        )
        .unwrap();
        let report = engine.verify_integrity().unwrap();
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("v1")));
    }

    #[test]
    fn apply_rollback_apply_round_trips_checksum() {
        let conn = open();
        let engine = MigrationEngine::new(&conn);
        let migrations = all_migrations();
        let m1 = &migrations[0];

        engine.apply(m1).unwrap();
        let checksum_a: String = conn
            .query_row(
                "SELECT checksum FROM schema_version WHERE version = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        engine.rollback(m1).unwrap();
        engine.apply(m1).unwrap();
        let checksum_b: String = conn
            .query_row(
                "SELECT checksum FROM schema_version WHERE version = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(checksum_a, checksum_b);
    }
}
