// src/graph/references.rs

//! Typed cross-reference CRUD, independent of the containment hierarchy.

use rusqlite::params;

use crate::db::models::Reference;
use crate::db::StorageDriver;
use crate::error::{ConstraintKind, Error, Result};

const MAX_REFERENCE_TYPE_LEN: usize = 50;
const MAX_CONTEXT_LEN: usize = 1000;

/// Insert a typed reference from `source_id` to `target_id`. Rejects
/// self-references before the statement reaches the schema's `CHECK`.
pub fn create_reference(
    driver: &StorageDriver,
    source_id: &str,
    target_id: &str,
    reference_type: &str,
    context: Option<&str>,
) -> Result<Reference> {
    if source_id == target_id {
        return Err(Error::Constraint(ConstraintKind::SelfReference(
            source_id.to_string(),
        )));
    }
    if reference_type.is_empty() || reference_type.len() > MAX_REFERENCE_TYPE_LEN {
        return Err(Error::Validation(format!(
            "reference_type must be 1..={MAX_REFERENCE_TYPE_LEN} characters"
        )));
    }
    if let Some(ctx) = context {
        if ctx.len() > MAX_CONTEXT_LEN {
            return Err(Error::Validation(format!(
                "context exceeds {MAX_CONTEXT_LEN} characters"
            )));
        }
    }

    driver.transaction(|| {
        let existing: Vec<i64> = driver.query(
            "SELECT 1 FROM node_references WHERE source_id = ?1 AND target_id = ?2 AND reference_type = ?3",
            params![source_id, target_id, reference_type],
            |row| row.get(0),
        )?;
        if !existing.is_empty() {
            return Err(Error::Constraint(ConstraintKind::DuplicateReference(
                source_id.to_string(),
                target_id.to_string(),
                reference_type.to_string(),
            )));
        }

        driver.run(
            "INSERT INTO node_references (source_id, target_id, reference_type, context)
             VALUES (?1, ?2, ?3, ?4)",
            params![source_id, target_id, reference_type, context],
        )?;

        driver
            .query(
                "SELECT id, source_id, target_id, reference_type, context, created_at
                 FROM node_references
                 WHERE source_id = ?1 AND target_id = ?2 AND reference_type = ?3",
                params![source_id, target_id, reference_type],
                Reference::from_row,
            )?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Constraint(ConstraintKind::Other("reference insert vanished".to_string())))
    })
}

/// Remove a single typed reference.
pub fn remove_reference(
    driver: &StorageDriver,
    source_id: &str,
    target_id: &str,
    reference_type: &str,
) -> Result<bool> {
    let result = driver.run(
        "DELETE FROM node_references WHERE source_id = ?1 AND target_id = ?2 AND reference_type = ?3",
        params![source_id, target_id, reference_type],
    )?;
    Ok(result.changes > 0)
}

/// References originating at `source_id`.
pub fn outgoing(driver: &StorageDriver, source_id: &str) -> Result<Vec<Reference>> {
    driver.query(
        "SELECT id, source_id, target_id, reference_type, context, created_at
         FROM node_references WHERE source_id = ?1 ORDER BY id",
        [source_id],
        Reference::from_row,
    )
}

/// References pointing at `target_id`.
pub fn incoming(driver: &StorageDriver, target_id: &str) -> Result<Vec<Reference>> {
    driver.query(
        "SELECT id, source_id, target_id, reference_type, context, created_at
         FROM node_references WHERE target_id = ?1 ORDER BY id",
        [target_id],
        Reference::from_row,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;
    use crate::db::StorageDriver as Driver;
    use crate::graph::nodes::{create, NewNode};

    fn setup() -> Driver {
        let driver = Driver::open(Preset::Testing.config()).unwrap();
        crate::db::migrations::MigrationEngine::new(driver.connection())
            .migrate()
            .unwrap();
        driver
    }

    fn node(driver: &Driver, id: &str) {
        create(driver, NewNode { id: id.to_string(), ..Default::default() }).unwrap();
    }

    #[test]
    fn create_and_read_back() {
        let driver = setup();
        node(&driver, "a");
        node(&driver, "b");
        let reference = create_reference(&driver, "a", "b", "links_to", Some("see also")).unwrap();
        assert_eq!(reference.source_id, "a");
        assert_eq!(reference.target_id, "b");

        assert_eq!(outgoing(&driver, "a").unwrap().len(), 1);
        assert_eq!(incoming(&driver, "b").unwrap().len(), 1);
    }

    #[test]
    fn self_reference_is_rejected() {
        let driver = setup();
        node(&driver, "a");
        assert!(create_reference(&driver, "a", "a", "links_to", None).is_err());
    }

    #[test]
    fn duplicate_typed_reference_is_rejected() {
        let driver = setup();
        node(&driver, "a");
        node(&driver, "b");
        create_reference(&driver, "a", "b", "links_to", None).unwrap();
        let err = create_reference(&driver, "a", "b", "links_to", None).unwrap_err();
        assert!(matches!(
            err,
            Error::Constraint(ConstraintKind::DuplicateReference(_, _, _))
        ));
    }

    #[test]
    fn distinct_types_between_same_nodes_are_allowed() {
        let driver = setup();
        node(&driver, "a");
        node(&driver, "b");
        create_reference(&driver, "a", "b", "links_to", None).unwrap();
        create_reference(&driver, "a", "b", "mentions", None).unwrap();
        assert_eq!(outgoing(&driver, "a").unwrap().len(), 2);
    }

    #[test]
    fn remove_reference_deletes_one_row() {
        let driver = setup();
        node(&driver, "a");
        node(&driver, "b");
        create_reference(&driver, "a", "b", "links_to", None).unwrap();
        assert!(remove_reference(&driver, "a", "b", "links_to").unwrap());
        assert!(outgoing(&driver, "a").unwrap().is_empty());
    }
}
