// src/error.rs

use thiserror::Error;

/// Semantic invariant violated by a graph operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    #[error("edge ({0}, {1}) would create a cycle")]
    Cycle(String, String),
    #[error("self-reference: {0}")]
    SelfReference(String),
    #[error("duplicate edge ({0}, {1})")]
    DuplicateEdge(String, String),
    #[error("duplicate reference ({0}, {1}, {2})")]
    DuplicateReference(String, String, String),
    #[error("{0} is not currently a child of {1}")]
    UnknownChild(String, String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

/// Transaction-state misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionErrorKind {
    #[error("nested transactions are not supported")]
    AlreadyActive,
    #[error("commit called on an inactive transaction")]
    CommitInactive,
    #[error("rollback called on an inactive transaction")]
    RollbackInactive,
    #[error("operation attempted after transaction was rolled back")]
    UseAfterRollback,
}

/// Core error taxonomy for kbgraph.
#[derive(Error, Debug)]
pub enum Error {
    /// Cannot open or handshake with the embedded store.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed SQL or a runtime error not covered by the variants below.
    #[error("query error executing `{sql}`: {source}")]
    Query {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Uniqueness, foreign-key, CHECK, or semantic invariant violation.
    #[error("constraint violation: {0}")]
    Constraint(#[from] ConstraintKind),

    /// Migration checksum mismatch, or an invalid rollback target.
    #[error("schema version error: {0}")]
    SchemaVersion(String),

    /// Transaction manager misuse.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionErrorKind),

    /// A value failed validation before it reached the store.
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O errors (backup, path handling).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(source: rusqlite::Error) -> Self {
        Error::Query {
            sql: String::new(),
            source,
        }
    }
}

/// Result type alias using kbgraph's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Wrap a raw [`rusqlite::Error`] with the SQL text that produced it, and
/// translate known constraint-violation messages into the semantic
/// [`ConstraintKind`] variants.
pub fn query_error(sql: &str, source: rusqlite::Error) -> Error {
    if let Some(kind) = classify_constraint(&source) {
        return Error::Constraint(kind);
    }
    Error::Query {
        sql: sql.to_string(),
        source,
    }
}

fn classify_constraint(err: &rusqlite::Error) -> Option<ConstraintKind> {
    let msg = err.to_string();
    if msg.contains("hierarchy_circular_check") || msg.contains("would create a cycle") {
        return Some(ConstraintKind::Other("cycle".to_string()));
    }
    if msg.contains("UNIQUE constraint failed: hierarchy_edges") {
        return Some(ConstraintKind::Other("duplicate edge".to_string()));
    }
    if msg.contains("UNIQUE constraint failed: node_references") {
        return Some(ConstraintKind::Other("duplicate reference".to_string()));
    }
    if msg.contains("FOREIGN KEY constraint failed") {
        return Some(ConstraintKind::Other("foreign key".to_string()));
    }
    None
}
