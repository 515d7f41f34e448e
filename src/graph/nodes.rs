// src/graph/nodes.rs

//! Node CRUD: validation, insert, patch, delete-with-cascade, and
//! filtered/paginated listing.

use rusqlite::params;

use crate::db::models::{Node, NodeType};
use crate::db::StorageDriver;
use crate::error::{ConstraintKind, Error, Result};

/// Input for [`create`]. Unset optional fields take the column defaults.
#[derive(Debug, Clone, Default)]
pub struct NewNode {
    pub id: String,
    pub name: Option<String>,
    pub content: Option<String>,
    pub doc_type: Option<String>,
    pub owner_id: Option<String>,
    pub node_type: Option<NodeType>,
    pub is_system_node: Option<bool>,
    pub fields_json: Option<String>,
    pub metadata_json: Option<String>,
}

/// Fields to change on [`update`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub name: Option<String>,
    pub content: Option<String>,
    pub doc_type: Option<Option<String>>,
    pub owner_id: Option<Option<String>>,
    pub node_type: Option<NodeType>,
    pub is_system_node: Option<bool>,
    pub fields_json: Option<String>,
    pub metadata_json: Option<String>,
}

/// Filters accepted by [`list`].
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub owner_id: Option<String>,
    pub node_type: Option<NodeType>,
    pub is_system_node: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn validate_json(label: &str, value: &str, max_len: usize) -> Result<()> {
    if value.len() > max_len {
        return Err(Error::Validation(format!(
            "{label} exceeds {max_len} characters"
        )));
    }
    serde_json::from_str::<serde_json::Value>(value)
        .map_err(|e| Error::Validation(format!("{label} is not valid JSON: {e}")))?;
    Ok(())
}

fn validate_new(node: &NewNode) -> Result<()> {
    if node.id.is_empty() || node.id.len() > 100 {
        return Err(Error::Validation(
            "id must be 1..=100 characters".to_string(),
        ));
    }
    if let Some(name) = &node.name {
        if name.len() > 1000 {
            return Err(Error::Validation("name exceeds 1000 characters".to_string()));
        }
    }
    if let Some(content) = &node.content {
        if content.len() > 1_000_000 {
            return Err(Error::Validation(
                "content exceeds 1,000,000 characters".to_string(),
            ));
        }
    }
    if let Some(doc_type) = &node.doc_type {
        if doc_type.len() > 100 {
            return Err(Error::Validation(
                "doc_type exceeds 100 characters".to_string(),
            ));
        }
    }
    if let Some(fields_json) = &node.fields_json {
        validate_json("fields_json", fields_json, 100_000)?;
    }
    if let Some(metadata_json) = &node.metadata_json {
        validate_json("metadata_json", metadata_json, 100_000)?;
    }
    Ok(())
}

/// Insert a node, validating field lengths and JSON shape first.
pub fn create(driver: &StorageDriver, node: NewNode) -> Result<Node> {
    validate_new(&node)?;

    let name = node.name.unwrap_or_default();
    let content = node.content.unwrap_or_default();
    let node_type = node.node_type.unwrap_or(NodeType::Node);
    let is_system_node = node.is_system_node.unwrap_or(false);
    let fields_json = node.fields_json.unwrap_or_else(|| "{}".to_string());
    let metadata_json = node.metadata_json.unwrap_or_else(|| "{}".to_string());

    driver.transaction(|| {
        driver.run(
            "INSERT INTO nodes (id, name, content, doc_type, owner_id, node_type, is_system_node, fields_json, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                node.id,
                name,
                content,
                node.doc_type,
                node.owner_id,
                node_type.as_str(),
                is_system_node as i64,
                fields_json,
                metadata_json,
            ],
        )?;
        get(driver, &node.id)?.ok_or_else(|| Error::Constraint(ConstraintKind::NotFound(node.id.clone())))
    })
}

/// Fetch a single node by id.
pub fn get(driver: &StorageDriver, id: &str) -> Result<Option<Node>> {
    let rows = driver.query(
        "SELECT id, name, content, doc_type, owner_id, created_at, updated_at, node_type, is_system_node, fields_json, metadata_json
         FROM nodes WHERE id = ?1",
        [id],
        Node::from_row,
    )?;
    Ok(rows.into_iter().next())
}

/// Update only the fields present in `patch`; `updated_at` is refreshed
/// by the `nodes_update_timestamp` trigger.
pub fn update(driver: &StorageDriver, id: &str, patch: NodePatch) -> Result<Node> {
    if let Some(content) = &patch.content {
        if content.len() > 1_000_000 {
            return Err(Error::Validation(
                "content exceeds 1,000,000 characters".to_string(),
            ));
        }
    }
    if let Some(name) = &patch.name {
        if name.len() > 1000 {
            return Err(Error::Validation("name exceeds 1000 characters".to_string()));
        }
    }
    if let Some(fields_json) = &patch.fields_json {
        validate_json("fields_json", fields_json, 100_000)?;
    }
    if let Some(metadata_json) = &patch.metadata_json {
        validate_json("metadata_json", metadata_json, 100_000)?;
    }

    driver.transaction(|| {
        let existing = get(driver, id)?.ok_or_else(|| Error::Constraint(ConstraintKind::NotFound(id.to_string())))?;

        let name = patch.name.unwrap_or(existing.name);
        let content = patch.content.unwrap_or(existing.content);
        let doc_type = patch.doc_type.unwrap_or(existing.doc_type);
        let owner_id = patch.owner_id.unwrap_or(existing.owner_id);
        let node_type = patch.node_type.unwrap_or(existing.node_type);
        let is_system_node = patch.is_system_node.unwrap_or(existing.is_system_node);
        let fields_json = patch.fields_json.unwrap_or(existing.fields_json);
        let metadata_json = patch.metadata_json.unwrap_or(existing.metadata_json);

        driver.run(
            "UPDATE nodes SET name = ?1, content = ?2, doc_type = ?3, owner_id = ?4, node_type = ?5, is_system_node = ?6, fields_json = ?7, metadata_json = ?8
             WHERE id = ?9",
            params![
                name,
                content,
                doc_type,
                owner_id,
                node_type.as_str(),
                is_system_node as i64,
                fields_json,
                metadata_json,
                id,
            ],
        )?;

        get(driver, id)?.ok_or_else(|| Error::Constraint(ConstraintKind::NotFound(id.to_string())))
    })
}

/// Delete a node. Cascades to hierarchy edges, references, stats, and
/// import join rows; any node with `owner_id` pointing here is set to
/// `NULL`, both enforced by `ON DELETE` clauses in the schema. The cascaded
/// edge/reference rows still fire `hierarchy_delete_stats`/
/// `references_delete_stats` because the driver opens every connection with
/// `recursive_triggers = ON` — without it SQLite does not run a table's own
/// `DELETE` triggers for rows removed by `ON DELETE CASCADE`.
pub fn delete(driver: &StorageDriver, id: &str) -> Result<bool> {
    driver.transaction(|| {
        let result = driver.run("DELETE FROM nodes WHERE id = ?1", [id])?;
        Ok(result.changes > 0)
    })
}

/// List nodes matching `filter`, ordered by id, bounded by pagination.
pub fn list(driver: &StorageDriver, filter: NodeFilter) -> Result<Vec<Node>> {
    let mut sql = String::from(
        "SELECT id, name, content, doc_type, owner_id, created_at, updated_at, node_type, is_system_node, fields_json, metadata_json
         FROM nodes WHERE 1 = 1",
    );
    let mut owner_id = None;
    let mut node_type = None;
    let mut is_system_node = None;

    if let Some(owner) = &filter.owner_id {
        sql.push_str(" AND owner_id = ?");
        owner_id = Some(owner.clone());
    }
    if let Some(nt) = &filter.node_type {
        sql.push_str(" AND node_type = ?");
        node_type = Some(nt.as_str().to_string());
    }
    if let Some(sys) = filter.is_system_node {
        sql.push_str(" AND is_system_node = ?");
        is_system_node = Some(sys as i64);
    }
    sql.push_str(" ORDER BY id");

    let limit = filter.limit.unwrap_or(1000).clamp(1, 10_000);
    let offset = filter.offset.unwrap_or(0).max(0);
    sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));

    // Build params in the same order the placeholders were appended above.
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(owner) = owner_id {
        params_vec.push(Box::new(owner));
    }
    if let Some(nt) = node_type {
        params_vec.push(Box::new(nt));
    }
    if let Some(sys) = is_system_node {
        params_vec.push(Box::new(sys));
    }
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();

    driver.query(&sql, params_refs.as_slice(), Node::from_row)
}
