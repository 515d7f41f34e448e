// src/bin/kbgraph.rs

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing::info;

use kbgraph::config::{Config, ConfigOverrides, Preset};
use kbgraph::db::migrations::MigrationEngine;
use kbgraph::db::StorageDriver;
use kbgraph::import::{self, ImportOptions, SourceRecord};

#[derive(Parser)]
#[command(name = "kbgraph")]
#[command(author, version, about = "Embedded storage engine for a personal knowledge graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open (creating if necessary) a store and bring its schema to the latest version
    Init {
        /// Database path (use `:memory:` for a throwaway store)
        #[arg(short, long, default_value = "kbgraph.db")]
        db_path: String,
        /// Named default bundle to start from
        #[arg(long, default_value = "development")]
        preset: String,
    },
    /// Apply pending schema migrations, or roll back to a given version
    Migrate {
        #[arg(short, long, default_value = "kbgraph.db")]
        db_path: String,
        /// Roll back to this schema version instead of migrating forward
        #[arg(long)]
        rollback_to: Option<i64>,
    },
    /// Print schema version, integrity check results, and recorder metrics
    Status {
        #[arg(short, long, default_value = "kbgraph.db")]
        db_path: String,
    },
    /// Bulk-import a JSON array of source records
    Import {
        /// Path to a JSON file containing an array of source records
        file: PathBuf,
        #[arg(short, long, default_value = "kbgraph.db")]
        db_path: String,
        /// Records per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Abort the whole run on the first constraint violation instead of skipping the row
        #[arg(long)]
        abort_on_error: bool,
    },
    /// Snapshot the store to another file using SQLite's own backup API
    Backup {
        #[arg(short, long, default_value = "kbgraph.db")]
        db_path: String,
        /// Destination path for the backup copy
        dest: PathBuf,
    },
    /// Print page accounting and per-table row counts
    Stats {
        #[arg(short, long, default_value = "kbgraph.db")]
        db_path: String,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn open_driver(db_path: &str, preset_name: &str) -> Result<StorageDriver> {
    let preset = Preset::from_env_name(preset_name);
    let config: Config = Config::merge_preset(
        preset,
        ConfigOverrides {
            path: Some(db_path.to_string()),
            memory: Some(db_path == kbgraph::config::MEMORY_SENTINEL),
            ..Default::default()
        },
    )?;
    StorageDriver::open(config).context("opening kbgraph store")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_path, preset } => {
            info!("initializing store at {}", db_path);
            let driver = open_driver(&db_path, &preset)?;
            let applied = MigrationEngine::new(driver.connection()).migrate()?;
            println!("Initialized store at: {}", db_path);
            println!("  Migrations applied: {}", applied.len());
            let version = MigrationEngine::new(driver.connection()).current_version()?;
            println!("  Schema version: {}", version);
            Ok(())
        }
        Commands::Migrate {
            db_path,
            rollback_to,
        } => {
            let driver = open_driver(&db_path, "development")?;
            let engine = MigrationEngine::new(driver.connection());
            if let Some(target) = rollback_to {
                info!("rolling back {} to version {}", db_path, target);
                let results = engine.rollback_to(target)?;
                println!("Rolled back {} migration(s)", results.len());
            } else {
                info!("migrating {} to the latest schema version", db_path);
                let results = engine.migrate()?;
                println!("Applied {} migration(s)", results.len());
            }
            println!("Schema version now: {}", engine.current_version()?);
            Ok(())
        }
        Commands::Status { db_path } => {
            let driver = open_driver(&db_path, "development")?;
            let health = driver.health();
            println!("Store: {}", db_path);
            println!("  Active: {}", health.active);
            println!("  Schema version: {}", health.schema_version);
            if health.issues.is_empty() {
                println!("  Integrity: ok");
            } else {
                println!("  Integrity issues:");
                for issue in &health.issues {
                    println!("    - {}", issue);
                }
            }
            println!("  Recorded queries: {}", health.metrics.total_recorded);
            println!(
                "  Average duration: {:.2}ms",
                health.metrics.average.as_secs_f64() * 1000.0
            );
            if !health.metrics.slowest.is_empty() {
                println!("  Slowest queries:");
                for record in &health.metrics.slowest {
                    println!(
                        "    {:>6.2}ms  {}  {}",
                        record.duration.as_secs_f64() * 1000.0,
                        record.operation,
                        record.sql
                    );
                }
            }
            if !health.issues.is_empty() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Import {
            file,
            db_path,
            batch_size,
            abort_on_error,
        } => {
            info!("importing {} into {}", file.display(), db_path);
            let bytes = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let records: Vec<SourceRecord> = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {} as a JSON array of source records", file.display()))?;
            let hash = import::file_hash(&bytes);
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("import.json")
                .to_string();

            let driver = open_driver(&db_path, "development")?;
            MigrationEngine::new(driver.connection()).migrate()?;

            let mut options = ImportOptions::default();
            if let Some(batch_size) = batch_size {
                options.batch_size = batch_size;
            }
            options.continue_on_error = !abort_on_error;

            let report = import::run_import(&driver, &records, &filename, &hash, options, |event| {
                println!(
                    "[{}] batch {}/{} processed={}/{} errors={} eta={}ms",
                    event.phase,
                    event.current_batch,
                    event.total_batches,
                    event.processed,
                    event.total,
                    event.errors,
                    event.eta_ms
                );
            })?;

            println!("Import finished in {}ms", report.duration_ms);
            println!(
                "  nodes:      imported={} skipped={} errors={}",
                report.nodes.imported, report.nodes.skipped, report.nodes.errors
            );
            println!(
                "  hierarchy:  imported={} skipped={} errors={}",
                report.hierarchy.imported, report.hierarchy.skipped, report.hierarchy.errors
            );
            println!(
                "  references: imported={} skipped={} errors={}",
                report.references.imported, report.references.skipped, report.references.errors
            );
            println!("  search index rebuilt: {}", report.search_index_rebuilt);
            if !report.errors.is_empty() {
                println!("  {} row error(s):", report.errors.len());
                for err in &report.errors {
                    println!("    [{}] {}: {}", err.index, err.id, err.message);
                }
            }
            Ok(())
        }
        Commands::Backup { db_path, dest } => {
            let driver = open_driver(&db_path, "development")?;
            driver.backup_to_path(&dest)?;
            println!("Backed up {} to {}", db_path, dest.display());
            Ok(())
        }
        Commands::Stats { db_path } => {
            let driver = open_driver(&db_path, "development")?;
            let stats = driver.stats()?;
            println!("Store: {}", db_path);
            println!("  Page size: {}", stats.page_size);
            println!("  Page count: {}", stats.page_count);
            println!("  Freelist pages: {}", stats.freelist_count);
            println!("  Table rows:");
            for (table, count) in &stats.table_rows {
                println!("    {:<20} {}", table, count);
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "kbgraph", &mut io::stdout());
            Ok(())
        }
    }
}
