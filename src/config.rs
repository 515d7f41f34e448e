// src/config.rs

//! Configuration surface consumed by the storage driver.
//!
//! `Config` is a frozen struct: the driver only ever reads it, it never
//! mutates or reloads it. Building one — from a preset, from environment
//! variables, or by hand — is the caller's job; `StorageDriver::open`
//! takes an already-built `Config` and nothing else.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Named default bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Development,
    Production,
    Testing,
    HighPerformance,
}

impl Preset {
    /// Select a preset from an environment-style name, falling back to
    /// `Development` — mirrors `NODE_ENV` resolution.
    pub fn from_env_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "production" | "prod" => Preset::Production,
            "testing" | "test" => Preset::Testing,
            "high-performance" | "high_performance" | "highperf" => Preset::HighPerformance,
            _ => Preset::Development,
        }
    }
}

/// The `journal_mode` pragma's allowed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DELETE" => Some(JournalMode::Delete),
            "TRUNCATE" => Some(JournalMode::Truncate),
            "PERSIST" => Some(JournalMode::Persist),
            "MEMORY" => Some(JournalMode::Memory),
            "WAL" => Some(JournalMode::Wal),
            "OFF" => Some(JournalMode::Off),
            _ => None,
        }
    }
}

/// The `synchronous` pragma's allowed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchronous {
    Off,
    Normal,
    Full,
    Extra,
}

impl Synchronous {
    fn as_str(&self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
            Synchronous::Extra => "EXTRA",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" => Some(Synchronous::Off),
            "NORMAL" => Some(Synchronous::Normal),
            "FULL" => Some(Synchronous::Full),
            "EXTRA" => Some(Synchronous::Extra),
            _ => None,
        }
    }
}

/// Tuning pragmas applied before any transaction runs.
#[derive(Debug, Clone)]
pub struct Pragmas {
    pub journal_mode: JournalMode,
    pub synchronous: Synchronous,
    pub foreign_keys: bool,
    /// Whether cascading deletes fire the affected table's own triggers.
    /// Must stay `true` — `hierarchy_delete_stats`/`references_delete_stats`
    /// only run on an `ON DELETE CASCADE` removal when this is on.
    pub recursive_triggers: bool,
    pub cache_size: i64,
    pub mmap_size: i64,
    pub temp_store: String,
    pub auto_vacuum: String,
    pub wal_autocheckpoint: i64,
    /// Any additional key=value pairs not named explicitly above.
    pub extra: BTreeMap<String, String>,
}

impl Default for Pragmas {
    fn default() -> Self {
        Pragmas {
            journal_mode: JournalMode::Wal,
            synchronous: Synchronous::Normal,
            foreign_keys: true,
            recursive_triggers: true,
            cache_size: -2000,
            mmap_size: 0,
            temp_store: "DEFAULT".to_string(),
            auto_vacuum: "NONE".to_string(),
            wal_autocheckpoint: 1000,
            extra: BTreeMap::new(),
        }
    }
}

impl Pragmas {
    /// Render as the ordered list of `PRAGMA key = value;` statements the
    /// driver executes on open.
    pub fn as_statements(&self) -> Vec<String> {
        let mut stmts = vec![
            format!("PRAGMA journal_mode = {};", self.journal_mode.as_str()),
            format!("PRAGMA synchronous = {};", self.synchronous.as_str()),
            format!(
                "PRAGMA foreign_keys = {};",
                if self.foreign_keys { "ON" } else { "OFF" }
            ),
            format!(
                "PRAGMA recursive_triggers = {};",
                if self.recursive_triggers { "ON" } else { "OFF" }
            ),
            format!("PRAGMA cache_size = {};", self.cache_size),
            format!("PRAGMA mmap_size = {};", self.mmap_size),
            format!("PRAGMA temp_store = {};", self.temp_store),
            format!("PRAGMA auto_vacuum = {};", self.auto_vacuum),
            format!(
                "PRAGMA wal_autocheckpoint = {};",
                self.wal_autocheckpoint
            ),
        ];
        for (k, v) in &self.extra {
            stmts.push(format!("PRAGMA {} = {};", k, v));
        }
        stmts
    }

    fn validate(&self) -> Result<()> {
        const VALID_KEYS: &[&str] = &[
            "journal_mode",
            "synchronous",
            "foreign_keys",
            "recursive_triggers",
            "cache_size",
            "mmap_size",
            "temp_store",
            "auto_vacuum",
            "wal_autocheckpoint",
        ];
        for key in self.extra.keys() {
            if VALID_KEYS.contains(&key.as_str()) {
                return Err(Error::Validation(format!(
                    "pragma `{key}` is already represented by a named field"
                )));
            }
        }
        Ok(())
    }
}

/// The in-memory sentinel used in place of a file path.
pub const MEMORY_SENTINEL: &str = ":memory:";

/// Frozen configuration consumed by [`crate::db::StorageDriver::open`].
#[derive(Debug, Clone)]
pub struct Config {
    pub path: String,
    pub memory: bool,
    pub read_only: bool,
    pub timeout_ms: u64,
    pub max_connections: u32,
    pub pragmas: Pragmas,
    pub enable_wal: bool,
    pub enable_fts: bool,
    pub auto_vacuum: bool,
    pub backup_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Preset::Development.config()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Config(path={}, memory={}, read_only={}, max_connections={})",
            self.path, self.memory, self.read_only, self.max_connections
        )
    }
}

impl Preset {
    /// Build this preset's default effective configuration.
    pub fn config(self) -> Config {
        match self {
            Preset::Development => Config {
                path: "kbgraph-dev.db".to_string(),
                memory: false,
                read_only: false,
                timeout_ms: 5_000,
                max_connections: 1,
                pragmas: Pragmas {
                    journal_mode: JournalMode::Wal,
                    synchronous: Synchronous::Normal,
                    ..Pragmas::default()
                },
                enable_wal: true,
                enable_fts: true,
                auto_vacuum: false,
                backup_interval_ms: 0,
            },
            Preset::Production => Config {
                path: "/var/lib/kbgraph/kbgraph.db".to_string(),
                memory: false,
                read_only: false,
                timeout_ms: 10_000,
                max_connections: 4,
                pragmas: Pragmas {
                    journal_mode: JournalMode::Wal,
                    synchronous: Synchronous::Full,
                    cache_size: -8000,
                    ..Pragmas::default()
                },
                enable_wal: true,
                enable_fts: true,
                auto_vacuum: true,
                backup_interval_ms: 3_600_000,
            },
            Preset::Testing => Config {
                path: MEMORY_SENTINEL.to_string(),
                memory: true,
                read_only: false,
                timeout_ms: 1_000,
                max_connections: 1,
                pragmas: Pragmas {
                    journal_mode: JournalMode::Memory,
                    synchronous: Synchronous::Off,
                    ..Pragmas::default()
                },
                enable_wal: false,
                enable_fts: true,
                auto_vacuum: false,
                backup_interval_ms: 0,
            },
            Preset::HighPerformance => Config {
                path: "/var/lib/kbgraph/kbgraph.db".to_string(),
                memory: false,
                read_only: false,
                timeout_ms: 30_000,
                max_connections: 8,
                pragmas: Pragmas {
                    journal_mode: JournalMode::Wal,
                    synchronous: Synchronous::Normal,
                    cache_size: -64_000,
                    mmap_size: 268_435_456,
                    wal_autocheckpoint: 10_000,
                    ..Pragmas::default()
                },
                enable_wal: true,
                enable_fts: true,
                auto_vacuum: false,
                backup_interval_ms: 900_000,
            },
        }
    }
}

impl Config {
    /// Merge `overrides` on top of this preset's defaults — only `Some`
    /// fields in `overrides` replace the preset's values.
    pub fn merge_preset(preset: Preset, overrides: ConfigOverrides) -> Result<Config> {
        let mut cfg = preset.config();
        if let Some(path) = overrides.path {
            cfg.path = path;
        }
        if let Some(memory) = overrides.memory {
            cfg.memory = memory;
        }
        if let Some(read_only) = overrides.read_only {
            cfg.read_only = read_only;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            cfg.timeout_ms = timeout_ms;
        }
        if let Some(max_connections) = overrides.max_connections {
            cfg.max_connections = max_connections;
        }
        if let Some(enable_wal) = overrides.enable_wal {
            cfg.enable_wal = enable_wal;
        }
        if let Some(enable_fts) = overrides.enable_fts {
            cfg.enable_fts = enable_fts;
        }
        if let Some(auto_vacuum) = overrides.auto_vacuum {
            cfg.auto_vacuum = auto_vacuum;
        }
        if let Some(backup_interval_ms) = overrides.backup_interval_ms {
            cfg.backup_interval_ms = backup_interval_ms;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the effective configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Validation(
                "max_connections must be >= 1".to_string(),
            ));
        }
        self.pragmas.validate()?;
        Ok(())
    }

    /// Build a [`Config`] from environment variables, falling back to the
    /// preset selected by `NODE_ENV` (or `KBGRAPH_ENV`). This is
    /// explicitly outside the core — a convenience the caller
    /// may use, never invoked by the driver itself.
    pub fn from_env() -> Result<Config> {
        let preset_name = std::env::var("DATABASE_PRESET")
            .or_else(|_| std::env::var("NODE_ENV"))
            .or_else(|_| std::env::var("KBGRAPH_ENV"))
            .unwrap_or_else(|_| "development".to_string());
        let preset = Preset::from_env_name(&preset_name);

        let overrides = ConfigOverrides {
            path: std::env::var("DATABASE_PATH").ok(),
            memory: std::env::var("DATABASE_MEMORY").ok().map(|v| parse_bool(&v)),
            read_only: std::env::var("DATABASE_READ_ONLY")
                .ok()
                .map(|v| parse_bool(&v)),
            timeout_ms: std::env::var("DATABASE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok()),
            enable_wal: std::env::var("DATABASE_ENABLE_WAL")
                .ok()
                .map(|v| parse_bool(&v)),
            enable_fts: std::env::var("DATABASE_ENABLE_FTS")
                .ok()
                .map(|v| parse_bool(&v)),
            auto_vacuum: std::env::var("DATABASE_AUTO_VACUUM")
                .ok()
                .map(|v| parse_bool(&v)),
            backup_interval_ms: std::env::var("DATABASE_BACKUP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        Config::merge_preset(preset, overrides)
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Partial overrides applied on top of a [`Preset`]'s defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub path: Option<String>,
    pub memory: Option<bool>,
    pub read_only: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub max_connections: Option<u32>,
    pub enable_wal: Option<bool>,
    pub enable_fts: Option<bool>,
    pub auto_vacuum: Option<bool>,
    pub backup_interval_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        for preset in [
            Preset::Development,
            Preset::Production,
            Preset::Testing,
            Preset::HighPerformance,
        ] {
            preset.config().validate().unwrap();
        }
    }

    #[test]
    fn merge_overrides_only_touches_given_fields() {
        let cfg = Config::merge_preset(
            Preset::Development,
            ConfigOverrides {
                max_connections: Some(16),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.max_connections, 16);
        assert_eq!(cfg.timeout_ms, Preset::Development.config().timeout_ms);
    }

    #[test]
    fn zero_max_connections_rejected() {
        let result = Config::merge_preset(
            Preset::Development,
            ConfigOverrides {
                max_connections: Some(0),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn preset_from_env_name_falls_back_to_development() {
        assert!(matches!(
            Preset::from_env_name("whatever-unknown"),
            Preset::Development
        ));
        assert!(matches!(Preset::from_env_name("PRODUCTION"), Preset::Production));
    }
}
