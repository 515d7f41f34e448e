// src/lib.rs

//! kbgraph: the storage engine for a personal knowledge-base of nodes
//! imported from an outliner-style dataset.
//!
//! # Architecture
//!
//! - Database-first: all state lives in an embedded SQLite file, no
//!   sidecar config or index files.
//! - Typed graph: nodes, an ordered parent→child hierarchy, and typed
//!   cross-references, with derived statistics maintained by triggers.
//! - Bulk import: a four-phase, batched pipeline for ingesting
//!   million-node datasets with partial-failure tolerance.
//! - Full-text search: an FTS5 shadow index kept in sync with node
//!   content by triggers, queryable through the graph layer.

pub mod config;
pub mod db;
mod error;
pub mod graph;
pub mod import;

pub use error::{ConstraintKind, Error, Result, TransactionErrorKind};
