//! Transaction scoping for service operations.
//!
//! # Responsibility
//! - Give callers an explicit, owned unit of work over one connection.
//! - Model nested savepoints as sub-units with their own outcome.
//! - Run repository-level atomic sequences, nesting correctly when the
//!   caller already owns a transaction.
//!
//! # Invariants
//! - A unit of work that is not committed is rolled back when dropped.
//! - A failed sub-unit is rolled back to its savepoint; the enclosing unit
//!   stays usable and the caller decides whether to continue.

use super::{DbError, DbResult};
use rusqlite::{Connection, DropBehavior, Transaction, TransactionBehavior};

const NESTED_SAVEPOINT: &str = "orgstore_atomic";

/// Outcome of a savepoint-scoped sub-unit.
#[derive(Debug)]
pub enum SubUnit<T, E> {
    /// Work succeeded and the savepoint was released into the outer unit.
    Committed(T),
    /// Work failed; its writes were rolled back, the outer unit continues.
    RolledBack(E),
}

impl<T, E> SubUnit<T, E> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Committed(value) => Ok(value),
            Self::RolledBack(err) => Err(err),
        }
    }
}

/// Caller-owned transaction over one connection.
///
/// Repositories and services are built on [`UnitOfWork::conn`], so every
/// statement they run belongs to this unit until `commit`.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> UnitOfWork<'conn> {
    /// Starts an immediate (write-locking) transaction.
    pub fn begin(conn: &'conn mut Connection) -> DbResult<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self { tx })
    }

    /// Connection view routed through this unit.
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    /// Runs `work` inside a savepoint.
    ///
    /// Errors from `work` never abort the unit; they come back as
    /// [`SubUnit::RolledBack`]. Only savepoint bookkeeping failures are
    /// returned as `Err`.
    pub fn sub_unit<T, E, F>(&mut self, work: F) -> DbResult<SubUnit<T, E>>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
    {
        let mut savepoint = self.tx.savepoint()?;
        match work(&savepoint) {
            Ok(value) => {
                savepoint.commit()?;
                Ok(SubUnit::Committed(value))
            }
            Err(err) => {
                savepoint.set_drop_behavior(DropBehavior::Rollback);
                savepoint.finish()?;
                Ok(SubUnit::RolledBack(err))
            }
        }
    }

    pub fn commit(self) -> DbResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> DbResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

/// Runs `work` atomically on `conn`.
///
/// Opens an immediate transaction when `conn` is in autocommit mode,
/// otherwise nests inside the caller's transaction with a savepoint. On
/// error every write made by `work` is undone before the error is returned.
pub fn run_atomic<T, E, F>(conn: &Connection, work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<DbError>,
{
    if conn.is_autocommit() {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        let value = work()?;
        tx.commit().map_err(DbError::from)?;
        return Ok(value);
    }

    conn.execute_batch(&format!("SAVEPOINT {NESTED_SAVEPOINT};"))
        .map_err(DbError::from)?;
    match work() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {NESTED_SAVEPOINT};"))
                .map_err(DbError::from)?;
            Ok(value)
        }
        Err(err) => {
            conn.execute_batch(&format!(
                "ROLLBACK TO {NESTED_SAVEPOINT}; RELEASE {NESTED_SAVEPOINT};"
            ))
            .map_err(DbError::from)?;
            Err(err)
        }
    }
}
