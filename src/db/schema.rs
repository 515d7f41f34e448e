// src/db/schema.rs

//! Declarative schema for kbgraph: tables, triggers, and the set the
//! migration engine's `verify_integrity` checks for.
//!
//! Each migration's `up`/`down` statements are kept as a `&[&str]` rather
//! than one batched string, because the migration engine
//! executes "every non-blank up statement" individually and checksums
//! their newline-joined concatenation.

/// The eight tables the schema defines.
pub const REQUIRED_TABLES: &[&str] = &[
    "nodes",
    "hierarchy_edges",
    "node_references",
    "search_index",
    "node_stats",
    "imports",
    "node_imports",
    "schema_version",
];

/// The nine triggers that keep derived state consistent.
pub const REQUIRED_TRIGGERS: &[&str] = &[
    "nodes_update_timestamp",
    "hierarchy_insert_stats",
    "hierarchy_delete_stats",
    "references_insert_stats",
    "references_delete_stats",
    "fts_insert",
    "fts_update",
    "fts_delete",
    "hierarchy_circular_check",
];

/// Migration 1 — baseline schema: every table plus every trigger, but
/// none of the performance indexes migration 2 adds (`rollback_to(1)`
/// needs those indexes gone).
pub const MIGRATION_V1_UP: &[&str] = &[
    r#"CREATE TABLE nodes (
        id TEXT PRIMARY KEY CHECK(length(id) BETWEEN 1 AND 100),
        name TEXT NOT NULL DEFAULT '' CHECK(length(name) <= 1000),
        content TEXT NOT NULL DEFAULT '' CHECK(length(content) <= 1000000),
        doc_type TEXT CHECK(doc_type IS NULL OR length(doc_type) <= 100),
        owner_id TEXT REFERENCES nodes(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        node_type TEXT NOT NULL DEFAULT 'node' CHECK(node_type IN ('node', 'field', 'reference')),
        is_system_node INTEGER NOT NULL DEFAULT 0 CHECK(is_system_node IN (0, 1)),
        fields_json TEXT NOT NULL DEFAULT '{}' CHECK(length(fields_json) <= 100000),
        metadata_json TEXT NOT NULL DEFAULT '{}' CHECK(length(metadata_json) <= 100000)
    )"#,
    r#"CREATE TABLE hierarchy_edges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        child_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        position INTEGER NOT NULL CHECK(position >= 0),
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        CHECK(parent_id != child_id),
        UNIQUE(parent_id, child_id)
    )"#,
    r#"CREATE TABLE node_references (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        target_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        reference_type TEXT NOT NULL DEFAULT 'reference' CHECK(length(reference_type) <= 50),
        context TEXT CHECK(context IS NULL OR length(context) <= 1000),
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        CHECK(source_id != target_id),
        UNIQUE(source_id, target_id, reference_type)
    )"#,
    r#"CREATE TABLE node_stats (
        node_id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
        access_count INTEGER NOT NULL DEFAULT 0 CHECK(access_count >= 0),
        reference_count INTEGER NOT NULL DEFAULT 0 CHECK(reference_count >= 0),
        child_count INTEGER NOT NULL DEFAULT 0 CHECK(child_count >= 0),
        depth_level INTEGER NOT NULL DEFAULT 0 CHECK(depth_level >= 0),
        last_accessed TEXT,
        computed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE imports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT NOT NULL,
        file_hash TEXT NOT NULL UNIQUE CHECK(length(file_hash) = 64),
        node_count INTEGER NOT NULL DEFAULT 0,
        started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        completed_at TEXT,
        status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'processing', 'completed', 'failed')),
        error_message TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}'
    )"#,
    r#"CREATE TABLE node_imports (
        node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
        import_id INTEGER NOT NULL REFERENCES imports(id) ON DELETE CASCADE,
        PRIMARY KEY (node_id, import_id)
    )"#,
    r#"CREATE VIRTUAL TABLE search_index USING fts5(
        id UNINDEXED,
        name,
        content,
        tags
    )"#,
    r#"CREATE TRIGGER nodes_update_timestamp AFTER UPDATE ON nodes
    WHEN NEW.updated_at = OLD.updated_at
    BEGIN
        UPDATE nodes SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
    END"#,
    r#"CREATE TRIGGER hierarchy_insert_stats AFTER INSERT ON hierarchy_edges
    BEGIN
        INSERT INTO node_stats (node_id, child_count) VALUES (NEW.parent_id, 1)
            ON CONFLICT(node_id) DO UPDATE SET child_count = child_count + 1;
    END"#,
    // hierarchy_delete_stats/references_delete_stats below also fire for
    // rows removed by ON DELETE CASCADE, but only with recursive_triggers
    // ON — the driver sets that pragma on every connection it opens.
    r#"CREATE TRIGGER hierarchy_delete_stats AFTER DELETE ON hierarchy_edges
    BEGIN
        UPDATE node_stats SET child_count = MAX(child_count - 1, 0) WHERE node_id = OLD.parent_id;
    END"#,
    r#"CREATE TRIGGER references_insert_stats AFTER INSERT ON node_references
    BEGIN
        INSERT INTO node_stats (node_id, reference_count) VALUES (NEW.target_id, 1)
            ON CONFLICT(node_id) DO UPDATE SET reference_count = reference_count + 1;
    END"#,
    r#"CREATE TRIGGER references_delete_stats AFTER DELETE ON node_references
    BEGIN
        UPDATE node_stats SET reference_count = MAX(reference_count - 1, 0) WHERE node_id = OLD.target_id;
    END"#,
    r#"CREATE TRIGGER fts_insert AFTER INSERT ON nodes
    BEGIN
        INSERT INTO search_index(rowid, id, name, content, tags)
        VALUES (
            NEW.rowid, NEW.id, NEW.name, NEW.content,
            COALESCE((SELECT group_concat(value, ' ') FROM json_each(NEW.fields_json, '$.tags')), '')
        );
    END"#,
    r#"CREATE TRIGGER fts_update AFTER UPDATE ON nodes
    BEGIN
        INSERT INTO search_index(search_index, rowid, id, name, content, tags)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.name, OLD.content, '');
        INSERT INTO search_index(rowid, id, name, content, tags)
        VALUES (
            NEW.rowid, NEW.id, NEW.name, NEW.content,
            COALESCE((SELECT group_concat(value, ' ') FROM json_each(NEW.fields_json, '$.tags')), '')
        );
    END"#,
    r#"CREATE TRIGGER fts_delete AFTER DELETE ON nodes
    BEGIN
        INSERT INTO search_index(search_index, rowid, id, name, content, tags)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.name, OLD.content, '');
    END"#,
    r#"CREATE TRIGGER hierarchy_circular_check BEFORE INSERT ON hierarchy_edges
    WHEN EXISTS (
        WITH RECURSIVE ancestors(node_id) AS (
            SELECT NEW.parent_id
            UNION
            SELECT hierarchy_edges.parent_id
            FROM hierarchy_edges
            JOIN ancestors ON hierarchy_edges.child_id = ancestors.node_id
        )
        SELECT 1 FROM ancestors WHERE node_id = NEW.child_id
    )
    BEGIN
        SELECT RAISE(ABORT, 'hierarchy_circular_check: edge would create a cycle');
    END"#,
];

/// Migration 1's down statements: drop everything it created, in reverse
/// dependency order.
pub const MIGRATION_V1_DOWN: &[&str] = &[
    "DROP TRIGGER hierarchy_circular_check",
    "DROP TRIGGER fts_delete",
    "DROP TRIGGER fts_update",
    "DROP TRIGGER fts_insert",
    "DROP TRIGGER references_delete_stats",
    "DROP TRIGGER references_insert_stats",
    "DROP TRIGGER hierarchy_delete_stats",
    "DROP TRIGGER hierarchy_insert_stats",
    "DROP TRIGGER nodes_update_timestamp",
    "DROP TABLE search_index",
    "DROP TABLE node_imports",
    "DROP TABLE imports",
    "DROP TABLE node_stats",
    "DROP TABLE node_references",
    "DROP TABLE hierarchy_edges",
    "DROP TABLE nodes",
];

/// Migration 2 — performance indexes over the baseline schema.
pub const MIGRATION_V2_UP: &[&str] = &[
    "CREATE INDEX idx_nodes_owner ON nodes(owner_id)",
    "CREATE INDEX idx_nodes_type ON nodes(node_type)",
    "CREATE INDEX idx_nodes_doc_type ON nodes(doc_type)",
    "CREATE INDEX idx_hierarchy_parent ON hierarchy_edges(parent_id, position)",
    "CREATE INDEX idx_hierarchy_child ON hierarchy_edges(child_id)",
    "CREATE INDEX idx_references_source ON node_references(source_id)",
    "CREATE INDEX idx_references_target ON node_references(target_id)",
    "CREATE INDEX idx_node_imports_import ON node_imports(import_id)",
];

pub const MIGRATION_V2_DOWN: &[&str] = &[
    "DROP INDEX idx_nodes_owner",
    "DROP INDEX idx_nodes_type",
    "DROP INDEX idx_nodes_doc_type",
    "DROP INDEX idx_hierarchy_parent",
    "DROP INDEX idx_hierarchy_child",
    "DROP INDEX idx_references_source",
    "DROP INDEX idx_references_target",
    "DROP INDEX idx_node_imports_import",
];
