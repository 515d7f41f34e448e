// tests/integration_test.rs

//! End-to-end scenarios from the design: empty bootstrap, cycle rejection,
//! reorder, bulk import, migration rollback, cascading delete.

use kbgraph::config::Preset;
use kbgraph::db::migrations::MigrationEngine;
use kbgraph::db::StorageDriver;
use kbgraph::{ConstraintKind, Error};
use kbgraph::graph::edges;
use kbgraph::graph::nodes::{self, NewNode};
use kbgraph::graph::references;
use kbgraph::import::{self, ImportOptions, SourceRecord};

fn open_and_migrate() -> StorageDriver {
    let driver = StorageDriver::open(Preset::Testing.config()).unwrap();
    MigrationEngine::new(driver.connection()).migrate().unwrap();
    driver
}

fn node(driver: &StorageDriver, id: &str) {
    nodes::create(
        driver,
        NewNode {
            id: id.to_string(),
            ..Default::default()
        },
    )
    .unwrap();
}

/// Scenario 1: empty bootstrap reaches version 2 with every table and
/// trigger present.
#[test]
fn empty_bootstrap() {
    let driver = open_and_migrate();
    let engine = MigrationEngine::new(driver.connection());
    assert_eq!(engine.current_version().unwrap(), 2);
    let report = engine.verify_integrity().unwrap();
    assert!(report.ok, "{:?}", report.errors);
}

/// Scenario 2: A→B, B→C, then C→A must be rejected as a cycle, and no
/// edge inserted.
#[test]
fn cycle_rejection() {
    let driver = open_and_migrate();
    node(&driver, "A");
    node(&driver, "B");
    node(&driver, "C");
    edges::create_edge(&driver, "A", "B", None).unwrap();
    edges::create_edge(&driver, "B", "C", None).unwrap();

    let err = edges::create_edge(&driver, "C", "A", None).unwrap_err();
    assert!(matches!(err, Error::Constraint(ConstraintKind::Cycle(_, _))));

    let children_of_c = edges::children(&driver, "C", true).unwrap();
    assert!(children_of_c.is_empty());
}

/// Scenario 3: P with children X,Y,Z at positions 0,1,2; reorder to
/// [Z,X,Y] yields {Z:0, X:1, Y:2}.
#[test]
fn reorder() {
    let driver = open_and_migrate();
    node(&driver, "P");
    node(&driver, "X");
    node(&driver, "Y");
    node(&driver, "Z");
    edges::create_edge(&driver, "P", "X", None).unwrap();
    edges::create_edge(&driver, "P", "Y", None).unwrap();
    edges::create_edge(&driver, "P", "Z", None).unwrap();

    edges::reorder_children(
        &driver,
        "P",
        &["Z".to_string(), "X".to_string(), "Y".to_string()],
    )
    .unwrap();

    let kids = edges::children(&driver, "P", true).unwrap();
    let ids: Vec<_> = kids.iter().map(|n| n.id.clone()).collect();
    assert_eq!(ids, vec!["Z".to_string(), "X".to_string(), "Y".to_string()]);
}

/// Scenario 4: import 10,000 records with 2 children and 1 reference
/// each; rerunning the same input inserts nothing new.
#[test]
fn bulk_import_10k() {
    let driver = open_and_migrate();

    let mut records = Vec::with_capacity(10_000 * 2);
    for i in 0..10_000 {
        records.push(SourceRecord {
            id: format!("n{i}"),
            name: Some(format!("Node {i}")),
            children: vec![format!("n{i}-a"), format!("n{i}-b")],
            references: vec![format!("n{}", (i + 1) % 10_000)],
            ..Default::default()
        });
    }
    for i in 0..10_000 {
        for suffix in ["a", "b"] {
            records.push(SourceRecord {
                id: format!("n{i}-{suffix}"),
                ..Default::default()
            });
        }
    }

    let hash = import::file_hash(b"10k-fixture");
    let report = import::run_import(
        &driver,
        &records,
        "10k.json",
        &hash,
        ImportOptions::default(),
        |_| {},
    )
    .unwrap();

    assert_eq!(report.nodes.imported, 30_000);
    assert_eq!(report.hierarchy.imported, 20_000);
    assert_eq!(report.references.imported, 10_000);
    assert!(report.search_index_rebuilt);

    let second = import::run_import(
        &driver,
        &records,
        "10k.json",
        &hash,
        ImportOptions::default(),
        |_| {},
    )
    .unwrap();
    assert_eq!(second.nodes.imported, 0);
    assert_eq!(second.nodes.skipped, 30_000);
    assert_eq!(second.hierarchy.imported, 0);
    assert_eq!(second.references.imported, 0);
}

/// Scenario 5: from version 2, roll back to 1; migration-2 indexes are
/// gone, tables unchanged, and `migrate()` restores v2 with the same
/// checksum.
#[test]
fn migration_rollback() {
    let driver = open_and_migrate();
    let engine = MigrationEngine::new(driver.connection());
    assert_eq!(engine.current_version().unwrap(), 2);

    let checksum_before: String = driver
        .connection()
        .query_row(
            "SELECT checksum FROM schema_version WHERE version = 2",
            [],
            |row| row.get(0),
        )
        .unwrap();

    engine.rollback_to(1).unwrap();
    assert_eq!(engine.current_version().unwrap(), 1);

    let idx_count: i64 = driver
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_nodes_owner'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(idx_count, 0);

    let table_count: i64 = driver
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'nodes'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(table_count, 1);

    engine.migrate().unwrap();
    assert_eq!(engine.current_version().unwrap(), 2);
    let checksum_after: String = driver
        .connection()
        .query_row(
            "SELECT checksum FROM schema_version WHERE version = 2",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(checksum_before, checksum_after);
}

/// Scenario 6: node N has 3 children and 5 incoming references; deleting
/// N cascades edges and references, decrements targets' reference_count,
/// and removes N's search index entry.
#[test]
fn cascading_delete() {
    let driver = open_and_migrate();
    node(&driver, "N");
    for i in 0..3 {
        let child = format!("child{i}");
        node(&driver, &child);
        edges::create_edge(&driver, "N", &child, None).unwrap();
    }
    for i in 0..5 {
        let source = format!("ref{i}");
        node(&driver, &source);
        references::create_reference(&driver, &source, "N", "mention", None).unwrap();
    }

    let stats_before: i64 = driver
        .connection()
        .query_row(
            "SELECT reference_count FROM node_stats WHERE node_id = 'N'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stats_before, 5);

    let child_count_before: i64 = driver
        .connection()
        .query_row(
            "SELECT child_count FROM node_stats WHERE node_id = 'N'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(child_count_before, 3);

    // Deleting a child/reference-source cascades to its hierarchy_edges/
    // node_references row, which must still decrement N's stats — this only
    // happens with recursive_triggers on, since the edge/reference row is
    // itself removed by an ON DELETE CASCADE off "child0"/"ref0", not by a
    // direct DELETE against hierarchy_edges/node_references.
    assert!(nodes::delete(&driver, "child0").unwrap());
    assert!(nodes::delete(&driver, "ref0").unwrap());

    let child_count_after: i64 = driver
        .connection()
        .query_row(
            "SELECT child_count FROM node_stats WHERE node_id = 'N'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(child_count_after, 2);

    let reference_count_after: i64 = driver
        .connection()
        .query_row(
            "SELECT reference_count FROM node_stats WHERE node_id = 'N'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(reference_count_after, 4);

    assert!(nodes::delete(&driver, "N").unwrap());

    let remaining_edges: i64 = driver
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM hierarchy_edges WHERE parent_id = 'N' OR child_id = 'N'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(remaining_edges, 0);

    let remaining_refs: i64 = driver
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM node_references WHERE source_id = 'N' OR target_id = 'N'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(remaining_refs, 0);

    let search_rows: i64 = driver
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM search_index WHERE id = 'N'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(search_rows, 0);
}

/// Driver-level health/backup/stats surface exercised end-to-end against
/// a populated store.
#[test]
fn health_and_stats_reflect_populated_store() {
    let driver = open_and_migrate();
    node(&driver, "a");
    node(&driver, "b");
    edges::create_edge(&driver, "a", "b", None).unwrap();

    let health = driver.health();
    assert!(health.active);
    assert_eq!(health.schema_version, 2);
    assert!(health.issues.is_empty());

    let stats = driver.stats().unwrap();
    let nodes_row = stats.table_rows.iter().find(|(t, _)| t == "nodes").unwrap();
    assert_eq!(nodes_row.1, 2);
}
