// src/graph/repair.rs

//! Hierarchy consistency repair: dangling-edge removal and duplicate-edge
//! collapse. Cycle detection over the materialized graph is
//! deliberately left unfixed here — cycles must be prevented at insert
//! time, not repaired after the fact (the design(a)).

use crate::db::StorageDriver;
use crate::error::Result;

/// Counts produced by [`validate_and_fix_hierarchy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub dangling_edges_removed: usize,
    pub duplicate_edges_collapsed: usize,
}

/// Deletes hierarchy edges whose `parent_id` or `child_id` no longer
/// names an existing node, then collapses any remaining `(parent_id,
/// child_id)` duplicates down to the oldest row (lowest `id`).
///
/// Neither case should arise under normal operation — foreign keys and
/// the `UNIQUE(parent_id, child_id)` constraint guard against them — but
/// both can surface after a bulk import ran with foreign keys disabled,
/// or against a store migrated from an external source.
pub fn validate_and_fix_hierarchy(driver: &StorageDriver) -> Result<RepairReport> {
    driver.transaction(|| {
        let dangling = driver.run(
            "DELETE FROM hierarchy_edges
             WHERE parent_id NOT IN (SELECT id FROM nodes)
                OR child_id NOT IN (SELECT id FROM nodes)",
            [],
        )?;

        let duplicates = driver.run(
            "DELETE FROM hierarchy_edges
             WHERE id NOT IN (
                 SELECT MIN(id) FROM hierarchy_edges GROUP BY parent_id, child_id
             )",
            [],
        )?;

        Ok(RepairReport {
            dangling_edges_removed: dangling.changes,
            duplicate_edges_collapsed: duplicates.changes,
        })
    })
}
