//! SQLite storage bootstrap, schema migrations and transaction scoping.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the organization store.
//! - Apply schema migrations in deterministic order.
//! - Provide caller-owned units of work with savepoint sub-units.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write application data before migrations succeed.
//! - Every returned connection enforces foreign keys (membership cascade).

use rusqlite::Connection;
use thiserror::Error;

pub mod migrations;
mod open;
mod unit_of_work;

pub use open::{open_db, open_db_in_memory, open_with_config};
pub use unit_of_work::{run_atomic, SubUnit, UnitOfWork};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

/// Removes every row from the store, children first.
///
/// Schema and `user_version` are kept; only data is dropped.
pub fn clear_database(conn: &mut Connection) -> DbResult<()> {
    let tx = conn.transaction()?;
    clear_rows(&tx)?;
    tx.commit()?;
    log::info!("event=db_clear module=db status=ok");
    Ok(())
}

/// Deletes every row on `conn` without opening a transaction of its own.
pub(crate) fn clear_rows(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "DELETE FROM organization_users;
         DELETE FROM organizations;
         DELETE FROM users;",
    )?;
    Ok(())
}
