// src/db/models.rs

//! Row structs mirroring the schema's tables, with `rusqlite::Row`
//! mapping.

use rusqlite::Row;

/// Kind of node content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Node,
    Field,
    Reference,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Node => "node",
            NodeType::Field => "field",
            NodeType::Reference => "reference",
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(NodeType::Node),
            "field" => Ok(NodeType::Field),
            "reference" => Ok(NodeType::Reference),
            other => Err(format!("invalid node_type: {other}")),
        }
    }
}

/// A node in the knowledge graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub content: String,
    pub doc_type: Option<String>,
    pub owner_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub node_type: NodeType,
    pub is_system_node: bool,
    pub fields_json: String,
    pub metadata_json: String,
}

impl Node {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let node_type_str: String = row.get("node_type")?;
        Ok(Node {
            id: row.get("id")?,
            name: row.get("name")?,
            content: row.get("content")?,
            doc_type: row.get("doc_type")?,
            owner_id: row.get("owner_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            node_type: node_type_str.parse().unwrap_or(NodeType::Node),
            is_system_node: row.get::<_, i64>("is_system_node")? != 0,
            fields_json: row.get("fields_json")?,
            metadata_json: row.get("metadata_json")?,
        })
    }
}

/// An ordered parent→child containment edge.
#[derive(Debug, Clone)]
pub struct HierarchyEdge {
    pub id: i64,
    pub parent_id: String,
    pub child_id: String,
    pub position: i64,
    pub created_at: String,
}

impl HierarchyEdge {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(HierarchyEdge {
            id: row.get("id")?,
            parent_id: row.get("parent_id")?,
            child_id: row.get("child_id")?,
            position: row.get("position")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A typed cross-link between two nodes, outside containment.
#[derive(Debug, Clone)]
pub struct Reference {
    pub id: i64,
    pub source_id: String,
    pub target_id: String,
    pub reference_type: String,
    pub context: Option<String>,
    pub created_at: String,
}

impl Reference {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Reference {
            id: row.get("id")?,
            source_id: row.get("source_id")?,
            target_id: row.get("target_id")?,
            reference_type: row.get("reference_type")?,
            context: row.get("context")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Derived per-node counters.
#[derive(Debug, Clone)]
pub struct NodeStats {
    pub node_id: String,
    pub access_count: i64,
    pub reference_count: i64,
    pub child_count: i64,
    pub depth_level: i64,
    pub last_accessed: Option<String>,
    pub computed_at: String,
}

impl NodeStats {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(NodeStats {
            node_id: row.get("node_id")?,
            access_count: row.get("access_count")?,
            reference_count: row.get("reference_count")?,
            child_count: row.get("child_count")?,
            depth_level: row.get("depth_level")?,
            last_accessed: row.get("last_accessed")?,
            computed_at: row.get("computed_at")?,
        })
    }
}

/// Status of a bulk-ingest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "processing" => Ok(ImportStatus::Processing),
            "completed" => Ok(ImportStatus::Completed),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(format!("invalid import status: {other}")),
        }
    }
}

/// A bulk-ingest run, identified by the hash of its source file.
#[derive(Debug, Clone)]
pub struct Import {
    pub id: i64,
    pub filename: String,
    pub file_hash: String,
    pub node_count: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: ImportStatus,
    pub error_message: Option<String>,
    pub metadata_json: String,
}

impl Import {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status_str: String = row.get("status")?;
        Ok(Import {
            id: row.get("id")?,
            filename: row.get("filename")?,
            file_hash: row.get("file_hash")?,
            node_count: row.get("node_count")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            status: status_str.parse().unwrap_or(ImportStatus::Pending),
            error_message: row.get("error_message")?,
            metadata_json: row.get("metadata_json")?,
        })
    }
}
