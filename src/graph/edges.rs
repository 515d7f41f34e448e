// src/graph/edges.rs

//! Hierarchy edges: ordered parent→child containment, cycle-safe
//! mutation, reordering, and traversal reads.

use rusqlite::params;

use crate::db::models::{HierarchyEdge, Node};
use crate::db::StorageDriver;
use crate::error::{ConstraintKind, Error, Result};

/// Explicit descendant-set computation used to pre-check a prospective
/// edge before the insert reaches the `hierarchy_circular_check`
/// trigger: walks the same `WITH RECURSIVE` shape the trigger
/// uses, so a caller can ask "would this cycle?" without attempting — and
/// rolling back — a doomed insert.
pub fn would_create_cycle(driver: &StorageDriver, parent_id: &str, child_id: &str) -> Result<bool> {
    if parent_id == child_id {
        return Ok(true);
    }
    let rows: Vec<i64> = driver.query(
        "WITH RECURSIVE ancestors(node_id) AS (
            SELECT ?1
            UNION
            SELECT hierarchy_edges.parent_id
            FROM hierarchy_edges
            JOIN ancestors ON hierarchy_edges.child_id = ancestors.node_id
        )
        SELECT 1 FROM ancestors WHERE node_id = ?2",
        params![parent_id, child_id],
        |row| row.get(0),
    )?;
    Ok(!rows.is_empty())
}

/// Insert an edge at a resolved position, assuming the caller already
/// holds an open write transaction: if `position` is absent, append
/// (`max+1`, or 0 if `parent_id` has no children yet); if present, shift
/// every sibling with `position >= p` up by one first.
/// Callers (`create_edge`, `move_node`) handle the self-edge and cycle
/// checks before reaching here.
fn insert_edge_in_tx(
    driver: &StorageDriver,
    parent_id: &str,
    child_id: &str,
    position: Option<i64>,
) -> Result<HierarchyEdge> {
    let existing: Vec<i64> = driver.query(
        "SELECT 1 FROM hierarchy_edges WHERE parent_id = ?1 AND child_id = ?2",
        params![parent_id, child_id],
        |row| row.get(0),
    )?;
    if !existing.is_empty() {
        return Err(Error::Constraint(ConstraintKind::DuplicateEdge(
            parent_id.to_string(),
            child_id.to_string(),
        )));
    }

    let resolved = match position {
        Some(p) => {
            if p < 0 {
                return Err(Error::Validation("position must be >= 0".to_string()));
            }
            driver.run(
                "UPDATE hierarchy_edges SET position = position + 1 WHERE parent_id = ?1 AND position >= ?2",
                params![parent_id, p],
            )?;
            p
        }
        None => {
            let max: Option<i64> = driver
                .query(
                    "SELECT MAX(position) FROM hierarchy_edges WHERE parent_id = ?1",
                    [parent_id],
                    |row| row.get(0),
                )?
                .into_iter()
                .next()
                .flatten();
            max.map(|m| m + 1).unwrap_or(0)
        }
    };

    driver.run(
        "INSERT INTO hierarchy_edges (parent_id, child_id, position) VALUES (?1, ?2, ?3)",
        params![parent_id, child_id, resolved],
    )?;

    driver
        .query(
            "SELECT id, parent_id, child_id, position, created_at FROM hierarchy_edges
             WHERE parent_id = ?1 AND child_id = ?2",
            params![parent_id, child_id],
            HierarchyEdge::from_row,
        )?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Constraint(ConstraintKind::Other("edge insert vanished".to_string())))
}

/// Remove `parent_id`'s former children from positions `> removed_position`
/// down by one, closing the gap the removal left. Assumes an
/// open write transaction.
fn compact_after_removal(driver: &StorageDriver, parent_id: &str, removed_position: i64) -> Result<()> {
    driver.run(
        "UPDATE hierarchy_edges SET position = position - 1 WHERE parent_id = ?1 AND position > ?2",
        params![parent_id, removed_position],
    )?;
    Ok(())
}

/// Insert a hierarchy edge. A cycle is rejected by [`would_create_cycle`]
/// before the insert is attempted, and again by the schema's own trigger
/// as a last line of defense. `position` absent appends;
/// present shifts siblings.
pub fn create_edge(
    driver: &StorageDriver,
    parent_id: &str,
    child_id: &str,
    position: Option<i64>,
) -> Result<HierarchyEdge> {
    if parent_id == child_id {
        return Err(Error::Constraint(ConstraintKind::SelfReference(
            parent_id.to_string(),
        )));
    }

    driver.transaction(|| {
        if would_create_cycle(driver, parent_id, child_id)? {
            return Err(Error::Constraint(ConstraintKind::Cycle(
                parent_id.to_string(),
                child_id.to_string(),
            )));
        }
        insert_edge_in_tx(driver, parent_id, child_id, position)
    })
}

/// Remove a single parent→child edge, compacting `parent_id`'s remaining
/// children. Removing a non-existent edge returns `false`, not an error.
pub fn remove_edge(driver: &StorageDriver, parent_id: &str, child_id: &str) -> Result<bool> {
    driver.transaction(|| {
        let removed_position: Option<i64> = driver
            .query(
                "SELECT position FROM hierarchy_edges WHERE parent_id = ?1 AND child_id = ?2",
                params![parent_id, child_id],
                |row| row.get(0),
            )?
            .into_iter()
            .next();

        let Some(position) = removed_position else {
            return Ok(false);
        };

        driver.run(
            "DELETE FROM hierarchy_edges WHERE parent_id = ?1 AND child_id = ?2",
            params![parent_id, child_id],
        )?;
        compact_after_removal(driver, parent_id, position)?;
        Ok(true)
    })
}

/// Counts produced by [`remove_all_edges`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveAllEdgesResult {
    pub as_parent: usize,
    pub as_child: usize,
}

/// Remove every edge where `node_id` is a parent or a child, compacting
/// the sibling positions of any former parent left with a gap.
pub fn remove_all_edges(driver: &StorageDriver, node_id: &str) -> Result<RemoveAllEdgesResult> {
    driver.transaction(|| {
        let former_parents: Vec<(String, i64)> = driver.query(
            "SELECT parent_id, position FROM hierarchy_edges WHERE child_id = ?1",
            [node_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let as_parent = driver.run(
            "DELETE FROM hierarchy_edges WHERE parent_id = ?1",
            [node_id],
        )?;
        let as_child = driver.run(
            "DELETE FROM hierarchy_edges WHERE child_id = ?1",
            [node_id],
        )?;

        for (parent_id, position) in former_parents {
            compact_after_removal(driver, &parent_id, position)?;
        }

        Ok(RemoveAllEdgesResult {
            as_parent: as_parent.changes,
            as_child: as_child.changes,
        })
    })
}

/// Rewrite `parent_id`'s children to the given order, assigning dense
/// positions `0..ordered_child_ids.len()`. Every id in
/// `ordered_child_ids` must already be a child of `parent_id`; the set
/// must match exactly, or the call fails without partial effect.
pub fn reorder_children(driver: &StorageDriver, parent_id: &str, ordered_child_ids: &[String]) -> Result<()> {
    driver.transaction(|| {
        let current: Vec<String> = driver.query(
            "SELECT child_id FROM hierarchy_edges WHERE parent_id = ?1",
            [parent_id],
            |row| row.get(0),
        )?;

        let mut current_sorted = current.clone();
        let mut requested_sorted = ordered_child_ids.to_vec();
        current_sorted.sort();
        requested_sorted.sort();
        if current_sorted != requested_sorted {
            return Err(Error::Constraint(ConstraintKind::UnknownChild(
                "one or more ids".to_string(),
                parent_id.to_string(),
            )));
        }

        // Shift everything out of the way first so the intermediate state
        // never collides with the UNIQUE(parent_id, child_id) constraint's
        // sibling CHECK-free position column — positions are not unique,
        // so this guards only against surprising read-your-writes order,
        // but keeps the rewrite a single clean pass.
        for (position, child_id) in ordered_child_ids.iter().enumerate() {
            driver.run(
                "UPDATE hierarchy_edges SET position = ?1 WHERE parent_id = ?2 AND child_id = ?3",
                params![position as i64, parent_id, child_id],
            )?;
        }
        Ok(())
    })
}

/// Detach `child_id` from every current parent, compacting each one's
/// remaining children, then re-attach it under `new_parent_id` following
/// [`create_edge`] semantics, atomically.
pub fn move_node(driver: &StorageDriver, child_id: &str, new_parent_id: &str, position: Option<i64>) -> Result<HierarchyEdge> {
    if child_id == new_parent_id {
        return Err(Error::Constraint(ConstraintKind::SelfReference(
            child_id.to_string(),
        )));
    }

    driver.transaction(|| {
        if would_create_cycle(driver, new_parent_id, child_id)? {
            return Err(Error::Constraint(ConstraintKind::Cycle(
                new_parent_id.to_string(),
                child_id.to_string(),
            )));
        }

        let former_parents: Vec<(String, i64)> = driver.query(
            "SELECT parent_id, position FROM hierarchy_edges WHERE child_id = ?1",
            [child_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        driver.run(
            "DELETE FROM hierarchy_edges WHERE child_id = ?1",
            [child_id],
        )?;
        for (parent_id, position) in former_parents {
            compact_after_removal(driver, &parent_id, position)?;
        }

        insert_edge_in_tx(driver, new_parent_id, child_id, position)
    })
}

/// Direct children of `parent_id`, in position order. `include_system`
/// controls whether nodes flagged `is_system_node` are included.
pub fn children(driver: &StorageDriver, parent_id: &str, include_system: bool) -> Result<Vec<Node>> {
    let sql = if include_system {
        "SELECT n.id, n.name, n.content, n.doc_type, n.owner_id, n.created_at, n.updated_at,
                n.node_type, n.is_system_node, n.fields_json, n.metadata_json
         FROM nodes n
         JOIN hierarchy_edges e ON e.child_id = n.id
         WHERE e.parent_id = ?1
         ORDER BY e.position"
    } else {
        "SELECT n.id, n.name, n.content, n.doc_type, n.owner_id, n.created_at, n.updated_at,
                n.node_type, n.is_system_node, n.fields_json, n.metadata_json
         FROM nodes n
         JOIN hierarchy_edges e ON e.child_id = n.id
         WHERE e.parent_id = ?1 AND n.is_system_node = 0
         ORDER BY e.position"
    };
    driver.query(sql, [parent_id], Node::from_row)
}

/// Direct parents of `child_id` — plural because the schema does not
/// forbid a node having more than one parent edge.
pub fn parents(driver: &StorageDriver, child_id: &str) -> Result<Vec<Node>> {
    driver.query(
        "SELECT n.id, n.name, n.content, n.doc_type, n.owner_id, n.created_at, n.updated_at,
                n.node_type, n.is_system_node, n.fields_json, n.metadata_json
         FROM nodes n
         JOIN hierarchy_edges e ON e.parent_id = n.id
         WHERE e.child_id = ?1",
        [child_id],
        Node::from_row,
    )
}

/// Nodes with no incoming hierarchy edge. `include_system` controls
/// whether nodes flagged `is_system_node` are included.
pub fn roots(driver: &StorageDriver, include_system: bool) -> Result<Vec<Node>> {
    let sql = if include_system {
        "SELECT id, name, content, doc_type, owner_id, created_at, updated_at,
                node_type, is_system_node, fields_json, metadata_json
         FROM nodes
         WHERE id NOT IN (SELECT child_id FROM hierarchy_edges)
         ORDER BY id"
    } else {
        "SELECT id, name, content, doc_type, owner_id, created_at, updated_at,
                node_type, is_system_node, fields_json, metadata_json
         FROM nodes
         WHERE id NOT IN (SELECT child_id FROM hierarchy_edges) AND is_system_node = 0
         ORDER BY id"
    };
    driver.query(sql, [], Node::from_row)
}

/// Nodes with no outgoing hierarchy edge. `include_system` controls
/// whether nodes flagged `is_system_node` are included.
pub fn leaves(driver: &StorageDriver, include_system: bool) -> Result<Vec<Node>> {
    let sql = if include_system {
        "SELECT id, name, content, doc_type, owner_id, created_at, updated_at,
                node_type, is_system_node, fields_json, metadata_json
         FROM nodes
         WHERE id NOT IN (SELECT parent_id FROM hierarchy_edges)
         ORDER BY id"
    } else {
        "SELECT id, name, content, doc_type, owner_id, created_at, updated_at,
                node_type, is_system_node, fields_json, metadata_json
         FROM nodes
         WHERE id NOT IN (SELECT parent_id FROM hierarchy_edges) AND is_system_node = 0
         ORDER BY id"
    };
    driver.query(sql, [], Node::from_row)
}

/// Maximum ancestor walk depth before `depth`/`path` give up rather than
/// recurse without bound.
const MAX_WALK_DEPTH: i64 = 100;

/// Distance from the nearest root (0 for a root itself), bounded to
/// [`MAX_WALK_DEPTH`] steps so a pathological chain cannot recurse past
/// it.
pub fn depth(driver: &StorageDriver, node_id: &str) -> Result<i64> {
    let rows: Vec<i64> = driver.query(
        "WITH RECURSIVE up(node_id, steps) AS (
            SELECT ?1, 0
            UNION ALL
            SELECT hierarchy_edges.parent_id, up.steps + 1
            FROM hierarchy_edges
            JOIN up ON hierarchy_edges.child_id = up.node_id
            WHERE up.steps < ?2
        )
        SELECT MAX(steps) FROM up",
        params![node_id, MAX_WALK_DEPTH],
        |row| row.get(0),
    )?;
    Ok(rows.into_iter().next().unwrap_or(0))
}

/// The chain of ancestors from the nearest root down to `node_id`,
/// inclusive, bounded to [`MAX_WALK_DEPTH`] steps.
pub fn path(driver: &StorageDriver, node_id: &str) -> Result<Vec<Node>> {
    let ids: Vec<String> = driver.query(
        "WITH RECURSIVE up(node_id, steps) AS (
            SELECT ?1, 0
            UNION ALL
            SELECT hierarchy_edges.parent_id, up.steps + 1
            FROM hierarchy_edges
            JOIN up ON hierarchy_edges.child_id = up.node_id
            WHERE up.steps < ?2
        )
        SELECT node_id FROM up ORDER BY steps DESC",
        params![node_id, MAX_WALK_DEPTH],
        |row| row.get(0),
    )?;

    let mut result = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(node) = super::nodes::get(driver, &id)? {
            result.push(node);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;
    use crate::graph::nodes::{create, NewNode};

    fn setup() -> StorageDriver {
        let driver = StorageDriver::open(Preset::Testing.config()).unwrap();
        crate::db::migrations::MigrationEngine::new(driver.connection())
            .migrate()
            .unwrap();
        driver
    }

    fn node(driver: &StorageDriver, id: &str) {
        create(driver, NewNode { id: id.to_string(), ..Default::default() }).unwrap();
    }

    #[test]
    fn append_position_defaults_to_max_plus_one() {
        let driver = setup();
        node(&driver, "p");
        node(&driver, "a");
        node(&driver, "b");
        let e1 = create_edge(&driver, "p", "a", None).unwrap();
        let e2 = create_edge(&driver, "p", "b", None).unwrap();
        assert_eq!(e1.position, 0);
        assert_eq!(e2.position, 1);
    }

    #[test]
    fn explicit_position_shifts_siblings() {
        let driver = setup();
        node(&driver, "p");
        node(&driver, "a");
        node(&driver, "b");
        node(&driver, "c");
        create_edge(&driver, "p", "a", None).unwrap();
        create_edge(&driver, "p", "b", None).unwrap();
        create_edge(&driver, "p", "c", Some(0)).unwrap();

        let kids = children(&driver, "p", true).unwrap();
        let ids: Vec<_> = kids.iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec!["c".to_string(), "a".to_string(), "b".to_string()]);
    }

    #[test]
    fn remove_edge_compacts_remaining_siblings() {
        let driver = setup();
        node(&driver, "p");
        node(&driver, "a");
        node(&driver, "b");
        node(&driver, "c");
        create_edge(&driver, "p", "a", None).unwrap();
        create_edge(&driver, "p", "b", None).unwrap();
        create_edge(&driver, "p", "c", None).unwrap();

        assert!(remove_edge(&driver, "p", "a").unwrap());

        let kids = children(&driver, "p", true).unwrap();
        assert_eq!(kids[0].id, "b");
        assert_eq!(kids[1].id, "c");
    }

    #[test]
    fn remove_missing_edge_returns_false() {
        let driver = setup();
        node(&driver, "p");
        node(&driver, "a");
        assert!(!remove_edge(&driver, "p", "a").unwrap());
    }

    #[test]
    fn create_remove_roundtrip_restores_ordering() {
        let driver = setup();
        node(&driver, "p");
        node(&driver, "a");
        node(&driver, "b");
        create_edge(&driver, "p", "a", None).unwrap();
        create_edge(&driver, "p", "b", None).unwrap();

        let before: Vec<_> = children(&driver, "p", true).unwrap().into_iter().map(|n| n.id).collect();
        create_edge(&driver, "p", "a", None).unwrap_err(); // already exists, duplicate
        remove_edge(&driver, "p", "b").unwrap();
        create_edge(&driver, "p", "b", None).unwrap();
        let after: Vec<_> = children(&driver, "p", true).unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn direct_cycle_is_rejected() {
        let driver = setup();
        node(&driver, "a");
        node(&driver, "b");
        create_edge(&driver, "a", "b", None).unwrap();
        let err = create_edge(&driver, "b", "a", None).unwrap_err();
        assert!(matches!(err, Error::Constraint(ConstraintKind::Cycle(_, _))));
    }

    #[test]
    fn self_edge_is_rejected() {
        let driver = setup();
        node(&driver, "a");
        let err = create_edge(&driver, "a", "a", None).unwrap_err();
        assert!(matches!(
            err,
            Error::Constraint(ConstraintKind::SelfReference(_))
        ));
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let driver = setup();
        node(&driver, "a");
        node(&driver, "b");
        node(&driver, "c");
        create_edge(&driver, "a", "b", None).unwrap();
        create_edge(&driver, "b", "c", None).unwrap();
        assert!(would_create_cycle(&driver, "c", "a").unwrap());
        let err = create_edge(&driver, "c", "a", None).unwrap_err();
        assert!(matches!(err, Error::Constraint(ConstraintKind::Cycle(_, _))));
    }

    #[test]
    fn reorder_children_rewrites_positions() {
        let driver = setup();
        node(&driver, "p");
        node(&driver, "a");
        node(&driver, "b");
        node(&driver, "c");
        create_edge(&driver, "p", "a", None).unwrap();
        create_edge(&driver, "p", "b", None).unwrap();
        create_edge(&driver, "p", "c", None).unwrap();

        reorder_children(
            &driver,
            "p",
            &["c".to_string(), "a".to_string(), "b".to_string()],
        )
        .unwrap();

        let kids = children(&driver, "p", true).unwrap();
        let ids: Vec<_> = kids.iter().map(|n| n.id.clone()).collect();
        assert_eq!(ids, vec!["c".to_string(), "a".to_string(), "b".to_string()]);
    }

    #[test]
    fn reorder_rejects_mismatched_set() {
        let driver = setup();
        node(&driver, "p");
        node(&driver, "a");
        create_edge(&driver, "p", "a", None).unwrap();
        assert!(reorder_children(&driver, "p", &["missing".to_string()]).is_err());
    }

    #[test]
    fn move_node_reparents_atomically_and_compacts_old_parent() {
        let driver = setup();
        node(&driver, "p1");
        node(&driver, "p2");
        node(&driver, "c1");
        node(&driver, "c2");
        create_edge(&driver, "p1", "c1", None).unwrap();
        create_edge(&driver, "p1", "c2", None).unwrap();

        move_node(&driver, "c1", "p2", None).unwrap();

        let remaining = children(&driver, "p1", true).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "c2");
        assert_eq!(children(&driver, "p2", true).unwrap().len(), 1);
    }

    #[test]
    fn move_node_same_parent_same_position_is_a_no_op_on_ordering() {
        let driver = setup();
        node(&driver, "p");
        node(&driver, "a");
        node(&driver, "b");
        create_edge(&driver, "p", "a", None).unwrap();
        create_edge(&driver, "p", "b", None).unwrap();

        let before: Vec<_> = children(&driver, "p", true).unwrap().into_iter().map(|n| n.id).collect();
        move_node(&driver, "a", "p", Some(0)).unwrap();
        let after: Vec<_> = children(&driver, "p", true).unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn roots_and_leaves_and_depth() {
        let driver = setup();
        node(&driver, "r");
        node(&driver, "mid");
        node(&driver, "leaf");
        create_edge(&driver, "r", "mid", None).unwrap();
        create_edge(&driver, "mid", "leaf", None).unwrap();

        let root_ids: Vec<_> = roots(&driver, true).unwrap().into_iter().map(|n| n.id).collect();
        assert!(root_ids.contains(&"r".to_string()));

        let leaf_ids: Vec<_> = leaves(&driver, true).unwrap().into_iter().map(|n| n.id).collect();
        assert!(leaf_ids.contains(&"leaf".to_string()));

        assert_eq!(depth(&driver, "r").unwrap(), 0);
        assert_eq!(depth(&driver, "leaf").unwrap(), 2);

        let chain: Vec<_> = path(&driver, "leaf").unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(chain, vec!["r".to_string(), "mid".to_string(), "leaf".to_string()]);
    }
}
