// src/db/transaction.rs

//! Transaction manager: immediate-lock write transactions with commit and
//! rollback, nesting forbidden.

use rusqlite::Connection;

use crate::error::{Error, Result, TransactionErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Inactive,
    Active,
    Committed,
    RolledBack,
}

/// One write transaction against `conn`. Begins with an immediate write
/// lock so contention fails fast rather than upgrading mid-transaction
///. Not `Clone` — a fresh manager is created per transaction.
pub struct TransactionManager<'c> {
    conn: &'c Connection,
    state: State,
}

impl<'c> TransactionManager<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        TransactionManager {
            conn,
            state: State::Inactive,
        }
    }

    /// Begin the transaction. Fails fast on a nested begin.
    pub fn begin(&mut self) -> Result<()> {
        if self.state == State::Active {
            return Err(Error::Transaction(TransactionErrorKind::AlreadyActive));
        }
        match self.conn.execute_batch("BEGIN IMMEDIATE") {
            Ok(()) => {
                self.state = State::Active;
                Ok(())
            }
            Err(e) if is_already_in_transaction(&e) => {
                Err(Error::Transaction(TransactionErrorKind::AlreadyActive))
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Commit. Errors if the transaction isn't active.
    pub fn commit(&mut self) -> Result<()> {
        if self.state != State::Active {
            return Err(Error::Transaction(TransactionErrorKind::CommitInactive));
        }
        self.conn.execute_batch("COMMIT")?;
        self.state = State::Committed;
        Ok(())
    }

    /// Roll back. Errors if the transaction isn't active.
    pub fn rollback(&mut self) -> Result<()> {
        if self.state != State::Active {
            return Err(Error::Transaction(TransactionErrorKind::RollbackInactive));
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.state = State::RolledBack;
        Ok(())
    }

    /// Any further operation attempted through this handle after a
    /// rollback must fail; callers check this before reusing a
    /// handle across suspension points.
    pub fn ensure_usable(&self) -> Result<()> {
        match self.state {
            State::RolledBack => Err(Error::Transaction(TransactionErrorKind::UseAfterRollback)),
            _ => Ok(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }
}

fn is_already_in_transaction(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("cannot start a transaction within a transaction")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_begin_fails() {
        let conn = Connection::open_in_memory().unwrap();
        let mut outer = TransactionManager::new(&conn);
        outer.begin().unwrap();

        let mut inner = TransactionManager::new(&conn);
        let err = inner.begin().unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(TransactionErrorKind::AlreadyActive)
        ));

        outer.rollback().unwrap();
    }

    #[test]
    fn commit_after_rollback_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let mut tx = TransactionManager::new(&conn);
        tx.begin().unwrap();
        tx.rollback().unwrap();
        assert!(matches!(
            tx.commit().unwrap_err(),
            Error::Transaction(TransactionErrorKind::CommitInactive)
        ));
        assert!(tx.ensure_usable().is_err());
    }

    #[test]
    fn rollback_twice_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let mut tx = TransactionManager::new(&conn);
        tx.begin().unwrap();
        tx.rollback().unwrap();
        assert!(matches!(
            tx.rollback().unwrap_err(),
            Error::Transaction(TransactionErrorKind::RollbackInactive)
        ));
    }

    #[test]
    fn commit_on_never_begun_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let mut tx = TransactionManager::new(&conn);
        assert!(matches!(
            tx.commit().unwrap_err(),
            Error::Transaction(TransactionErrorKind::CommitInactive)
        ));
    }
}
