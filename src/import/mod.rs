// src/import/mod.rs

//! Bulk import pipeline: a four-phase, batched, partial-failure-tolerant
//! ingestion of an externally supplied stream of source-node records.
//!
//! Phase ordering (nodes, then hierarchy, then references) is load-bearing:
//! import mode disables foreign keys for throughput, which is only safe
//! because every node referenced by a hierarchy or reference row was
//! already inserted in Phase 1 (the design(b)). Do not
//! reorder these phases.

pub mod memory;
pub mod progress;

use std::time::Instant;

use rusqlite::params;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::db::models::NodeType;
use crate::db::StorageDriver;
use crate::error::Result;
use memory::{request_gc_hint_if_over, MemorySampler};
use progress::{estimate_eta_ms, Phase, ProgressEvent};

/// Default batch size.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default memory-gate ceiling in megabytes.
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 100;

/// One record from the externally supplied source stream. Producing this
/// stream from a file format is outside this core — the
/// pipeline only knows how to turn records into rows.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SourceRecord {
    pub id: String,
    pub name: Option<String>,
    pub content: Option<String>,
    pub doc_type: Option<String>,
    pub owner_id: Option<String>,
    pub node_type: Option<NodeType>,
    pub is_system_node: Option<bool>,
    pub fields_json: Option<String>,
    pub metadata_json: Option<String>,
    pub children: Vec<String>,
    pub references: Vec<String>,
}

/// Tunables for one [`run_import`] call.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub continue_on_error: bool,
    pub memory_limit_mb: u64,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            continue_on_error: true,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
        }
    }
}

/// One record-level failure, keeping the batch's other rows unaffected
/// when `continue_on_error` is set.
#[derive(Debug, Clone)]
pub struct ImportError {
    pub index: usize,
    pub id: String,
    pub message: String,
}

/// Per-phase outcome counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseCounts {
    pub imported: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Aggregate result of [`run_import`].
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub import_id: i64,
    pub nodes: PhaseCounts,
    pub hierarchy: PhaseCounts,
    pub references: PhaseCounts,
    pub search_index_rebuilt: bool,
    pub duration_ms: u64,
    pub peak_mem_mb: f64,
    pub errors: Vec<ImportError>,
}

fn hash_file_contents(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Hash identifying a source file for the `imports.file_hash` unique key.
/// Exposed so a caller holding the raw bytes of the
/// file it parsed `records` from can compute the same identity a second
/// run would reuse.
pub fn file_hash(bytes: &[u8]) -> String {
    hash_file_contents(bytes)
}

/// Apply "import mode" tuning ahead of Phase 1: synchronous writes off,
/// in-memory journal, an enlarged cache, and foreign-key checks off.
/// `recursive_triggers` stays on so a later cascading delete still fires
/// `hierarchy_delete_stats`/`references_delete_stats`.
fn enter_import_mode(driver: &StorageDriver) -> Result<()> {
    driver.connection().execute_batch(
        "PRAGMA synchronous = OFF;
         PRAGMA journal_mode = MEMORY;
         PRAGMA cache_size = -64000;
         PRAGMA foreign_keys = OFF;
         PRAGMA recursive_triggers = ON;",
    )?;
    Ok(())
}

/// Restore the configured tuning and run `ANALYZE` after Phase 4.
fn leave_import_mode(driver: &StorageDriver) -> Result<()> {
    for stmt in driver.config().pragmas.as_statements() {
        driver.connection().execute_batch(&stmt)?;
    }
    driver.connection().execute_batch("ANALYZE;")?;
    Ok(())
}

fn find_or_create_import_row(driver: &StorageDriver, filename: &str, hash: &str) -> Result<i64> {
    let existing: Option<i64> = driver
        .query(
            "SELECT id FROM imports WHERE file_hash = ?1",
            [hash],
            |row| row.get(0),
        )?
        .into_iter()
        .next();
    if let Some(id) = existing {
        driver.run(
            "UPDATE imports SET status = 'processing', error_message = NULL WHERE id = ?1",
            [id],
        )?;
        return Ok(id);
    }
    driver.run(
        "INSERT INTO imports (filename, file_hash, status) VALUES (?1, ?2, 'processing')",
        params![filename, hash],
    )?;
    Ok(driver.connection().last_insert_rowid())
}

/// Run the four-phase bulk import of `records` against `driver`, reporting
/// progress through `on_progress` after every batch.
pub fn run_import(
    driver: &StorageDriver,
    records: &[SourceRecord],
    filename: &str,
    hash: &str,
    options: ImportOptions,
    mut on_progress: impl FnMut(ProgressEvent),
) -> Result<ImportReport> {
    let start = Instant::now();
    let mut sampler = MemorySampler::new();
    let mut peak_mem_mb: f64 = 0.0;
    let mut errors = Vec::new();

    let import_id = find_or_create_import_row(driver, filename, hash)?;

    enter_import_mode(driver)?;

    let nodes_result = run_nodes_phase(driver, records, &options, &mut sampler, &mut peak_mem_mb, start, &mut on_progress);
    let nodes = match nodes_result {
        Ok(counts) => counts,
        Err(e) => {
            let _ = leave_import_mode(driver);
            driver.run(
                "UPDATE imports SET status = 'failed', error_message = ?1, completed_at = CURRENT_TIMESTAMP WHERE id = ?2",
                params![e.to_string(), import_id],
            )?;
            return Err(e);
        }
    };
    errors.extend(nodes.errors_detail.clone());

    let hierarchy_result = run_hierarchy_phase(driver, records, &options, &mut sampler, &mut peak_mem_mb, start, &mut on_progress);
    let hierarchy = match hierarchy_result {
        Ok(counts) => counts,
        Err(e) => {
            let _ = leave_import_mode(driver);
            driver.run(
                "UPDATE imports SET status = 'failed', error_message = ?1, completed_at = CURRENT_TIMESTAMP WHERE id = ?2",
                params![e.to_string(), import_id],
            )?;
            return Err(e);
        }
    };
    errors.extend(hierarchy.errors_detail.clone());

    let references_result = run_references_phase(driver, records, &options, &mut sampler, &mut peak_mem_mb, start, &mut on_progress);
    let references = match references_result {
        Ok(counts) => counts,
        Err(e) => {
            let _ = leave_import_mode(driver);
            driver.run(
                "UPDATE imports SET status = 'failed', error_message = ?1, completed_at = CURRENT_TIMESTAMP WHERE id = ?2",
                params![e.to_string(), import_id],
            )?;
            return Err(e);
        }
    };
    errors.extend(references.errors_detail.clone());

    let search_index_rebuilt = run_search_index_phase(driver, start, &mut on_progress);

    let leave_result = leave_import_mode(driver);
    if let Err(e) = &leave_result {
        warn!("failed to restore tuning after import: {e}");
    }

    driver.run(
        "UPDATE imports SET status = 'completed', node_count = ?1, completed_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![records.len() as i64, import_id],
    )?;

    let tie_nodes_to_import = |node_id: &str| -> Result<()> {
        driver.run(
            "INSERT OR IGNORE INTO node_imports (node_id, import_id) VALUES (?1, ?2)",
            params![node_id, import_id],
        )?;
        Ok(())
    };
    for record in records {
        let _ = tie_nodes_to_import(&record.id);
    }

    info!(
        "import {import_id} complete: nodes={}/{} hierarchy={}/{} references={}/{}",
        nodes.counts.imported,
        records.len(),
        hierarchy.counts.imported,
        hierarchy.counts.imported + hierarchy.counts.skipped,
        references.counts.imported,
        references.counts.imported + references.counts.skipped,
    );

    Ok(ImportReport {
        import_id,
        nodes: nodes.counts,
        hierarchy: hierarchy.counts,
        references: references.counts,
        search_index_rebuilt,
        duration_ms: start.elapsed().as_millis() as u64,
        peak_mem_mb,
        errors,
    })
}

/// Internal accumulator threading both the public [`PhaseCounts`] and the
/// detailed per-error records through one phase's batches.
struct PhaseOutcome {
    counts: PhaseCounts,
    errors_detail: Vec<ImportError>,
}

fn sample_and_gate(driver: &StorageDriver, sampler: &mut MemorySampler, peak_mem_mb: &mut f64, limit_mb: u64) -> f64 {
    let mem_mb = sampler.sample_mb();
    if mem_mb > *peak_mem_mb {
        *peak_mem_mb = mem_mb;
    }
    request_gc_hint_if_over(driver.connection(), mem_mb, limit_mb);
    mem_mb
}

fn run_nodes_phase(
    driver: &StorageDriver,
    records: &[SourceRecord],
    options: &ImportOptions,
    sampler: &mut MemorySampler,
    peak_mem_mb: &mut f64,
    start: Instant,
    on_progress: &mut impl FnMut(ProgressEvent),
) -> Result<PhaseOutcome> {
    let batch_size = options.batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size).max(1);
    let mut counts = PhaseCounts::default();
    let mut errors_detail = Vec::new();

    for (batch_index, batch) in records.chunks(batch_size).enumerate() {
        let batch_result: Result<(usize, usize, Vec<ImportError>)> = driver.transaction(|| {
            let mut imported = 0;
            let mut skipped = 0;
            let mut batch_errors = Vec::new();

            for (offset, record) in batch.iter().enumerate() {
                let global_index = batch_index * batch_size + offset;
                let name = record.name.clone().unwrap_or_default();
                let content = record.content.clone().unwrap_or_default();
                let node_type = record.node_type.unwrap_or(NodeType::Node);
                let is_system_node = record.is_system_node.unwrap_or(false);
                let fields_json = record.fields_json.clone().unwrap_or_else(|| "{}".to_string());
                let metadata_json = record.metadata_json.clone().unwrap_or_else(|| "{}".to_string());

                let result = driver.run(
                    "INSERT INTO nodes (id, name, content, doc_type, owner_id, node_type, is_system_node, fields_json, metadata_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        record.id,
                        name,
                        content,
                        record.doc_type,
                        record.owner_id,
                        node_type.as_str(),
                        is_system_node as i64,
                        fields_json,
                        metadata_json,
                    ],
                );

                match result {
                    Ok(run_result) if run_result.changes > 0 => imported += 1,
                    Ok(_) => skipped += 1,
                    Err(e) if options.continue_on_error => {
                        batch_errors.push(ImportError {
                            index: global_index,
                            id: record.id.clone(),
                            message: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }

            Ok((imported, skipped, batch_errors))
        });

        let (imported, skipped, batch_errors) = batch_result?;
        counts.imported += imported;
        counts.skipped += skipped;
        counts.errors += batch_errors.len();
        errors_detail.extend(batch_errors);

        let mem_mb = sample_and_gate(driver, sampler, peak_mem_mb, options.memory_limit_mb);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        on_progress(ProgressEvent {
            phase: Phase::Nodes,
            total: records.len(),
            processed: ((batch_index + 1) * batch_size).min(records.len()),
            errors: counts.errors,
            current_batch: batch_index + 1,
            total_batches,
            mem_mb,
            elapsed_ms,
            eta_ms: estimate_eta_ms(elapsed_ms, batch_index, total_batches),
        });
        debug!("nodes batch {}/{total_batches}: +{imported} imported, {skipped} skipped", batch_index + 1);
    }

    Ok(PhaseOutcome { counts, errors_detail })
}

fn run_hierarchy_phase(
    driver: &StorageDriver,
    records: &[SourceRecord],
    options: &ImportOptions,
    sampler: &mut MemorySampler,
    peak_mem_mb: &mut f64,
    start: Instant,
    on_progress: &mut impl FnMut(ProgressEvent),
) -> Result<PhaseOutcome> {
    let rows: Vec<EdgeShapedRow> = records
        .iter()
        .flat_map(|record| {
            record
                .children
                .iter()
                .enumerate()
                .map(move |(position, child_id)| EdgeShapedRow {
                    first_id: record.id.clone(),
                    second_id: child_id.clone(),
                    literal: String::new(),
                    position: position as i64,
                })
        })
        .collect();

    run_edge_shaped_phase(
        driver,
        &rows,
        options,
        sampler,
        peak_mem_mb,
        start,
        on_progress,
        Phase::Hierarchy,
        "INSERT INTO hierarchy_edges (parent_id, child_id, position) VALUES (?1, ?2, ?3)
         ON CONFLICT(parent_id, child_id) DO NOTHING",
    )
}

fn run_references_phase(
    driver: &StorageDriver,
    records: &[SourceRecord],
    options: &ImportOptions,
    sampler: &mut MemorySampler,
    peak_mem_mb: &mut f64,
    start: Instant,
    on_progress: &mut impl FnMut(ProgressEvent),
) -> Result<PhaseOutcome> {
    let rows: Vec<EdgeShapedRow> = records
        .iter()
        .flat_map(|record| {
            record.references.iter().map(move |target_id| EdgeShapedRow {
                first_id: record.id.clone(),
                second_id: target_id.clone(),
                literal: "mention".to_string(),
                position: 0,
            })
        })
        .collect();

    run_edge_shaped_phase(
        driver,
        &rows,
        options,
        sampler,
        peak_mem_mb,
        start,
        on_progress,
        Phase::References,
        "INSERT INTO node_references (source_id, target_id, reference_type) VALUES (?1, ?2, ?3)
         ON CONFLICT(source_id, target_id, reference_type) DO NOTHING",
    )
}

/// One row queued for [`run_edge_shaped_phase`]: `literal` is the
/// reference type for the references phase (unused by hierarchy),
/// `position` is the sibling position for the hierarchy phase (unused by
/// references).
struct EdgeShapedRow {
    first_id: String,
    second_id: String,
    literal: String,
    position: i64,
}

/// Shared batch-insert loop for the hierarchy and reference phases, which
/// differ only in their row shape and insert statement.
#[allow(clippy::too_many_arguments)]
fn run_edge_shaped_phase(
    driver: &StorageDriver,
    rows: &[EdgeShapedRow],
    options: &ImportOptions,
    sampler: &mut MemorySampler,
    peak_mem_mb: &mut f64,
    start: Instant,
    on_progress: &mut impl FnMut(ProgressEvent),
    phase: Phase,
    sql: &str,
) -> Result<PhaseOutcome> {
    let batch_size = options.batch_size.max(1);
    let total_batches = rows.len().div_ceil(batch_size).max(1);
    let mut counts = PhaseCounts::default();
    let mut errors_detail = Vec::new();

    for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
        let batch_result: Result<(usize, usize, Vec<ImportError>)> = driver.transaction(|| {
            let mut imported = 0;
            let mut skipped = 0;
            let mut batch_errors = Vec::new();

            for (offset, row) in batch.iter().enumerate() {
                let global_index = batch_index * batch_size + offset;
                let result = if phase == Phase::Hierarchy {
                    driver.run(sql, params![row.first_id, row.second_id, row.position])
                } else {
                    driver.run(sql, params![row.first_id, row.second_id, row.literal])
                };

                match result {
                    Ok(run_result) if run_result.changes > 0 => imported += 1,
                    Ok(_) => skipped += 1,
                    Err(e) if options.continue_on_error => {
                        batch_errors.push(ImportError {
                            index: global_index,
                            id: row.first_id.clone(),
                            message: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }

            Ok((imported, skipped, batch_errors))
        });

        let (imported, skipped, batch_errors) = batch_result?;
        counts.imported += imported;
        counts.skipped += skipped;
        counts.errors += batch_errors.len();
        errors_detail.extend(batch_errors);

        let mem_mb = sample_and_gate(driver, sampler, peak_mem_mb, options.memory_limit_mb);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        on_progress(ProgressEvent {
            phase,
            total: rows.len(),
            processed: ((batch_index + 1) * batch_size).min(rows.len()),
            errors: counts.errors,
            current_batch: batch_index + 1,
            total_batches,
            mem_mb,
            elapsed_ms,
            eta_ms: estimate_eta_ms(elapsed_ms, batch_index, total_batches),
        });
    }

    Ok(PhaseOutcome { counts, errors_detail })
}

/// Rebuild the FTS5 index in one command. Failure is logged and
/// swallowed — the index is optional.
fn run_search_index_phase(driver: &StorageDriver, start: Instant, on_progress: &mut impl FnMut(ProgressEvent)) -> bool {
    let result = driver
        .connection()
        .execute_batch("INSERT INTO search_index(search_index) VALUES ('rebuild');");
    let ok = result.is_ok();
    if let Err(e) = result {
        warn!("search index rebuild failed (swallowed): {e}");
    }
    on_progress(ProgressEvent {
        phase: Phase::SearchIndex,
        total: 1,
        processed: 1,
        errors: if ok { 0 } else { 1 },
        current_batch: 1,
        total_batches: 1,
        mem_mb: 0.0,
        elapsed_ms: start.elapsed().as_millis() as u64,
        eta_ms: 0,
    });
    ok
}
