//! Repository layer abstractions and SQLite persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for users,
//!   organizations (with memberships) and aggregate statistics.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repositories are only constructed over migrated connections.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Repository APIs return semantic errors (`*NotFound`, constraint
//!   violations) in addition to DB transport errors.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::organization::OrganizationId;
use crate::model::user::{UserId, UserValidationError};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

pub mod organization_repo;
pub mod stats_repo;
pub mod user_repo;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("organization not found: {0}")]
    OrganizationNotFound(OrganizationId),
    #[error("user not found: {0}")]
    UserNotFound(UserId),
    #[error("membership not found: organization={organization_id} user={user_id}")]
    MembershipNotFound {
        organization_id: OrganizationId,
        user_id: UserId,
    },
    #[error("user {0} already has a personal organization")]
    PersonalOrganizationExists(UserId),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("connection schema version {actual} does not match expected {expected}")]
    UninitializedConnection { expected: u32, actual: u32 },
    #[error("required table `{0}` is missing")]
    MissingRequiredTable(&'static str),
    #[error("required column `{table}.{column}` is missing")]
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    #[error(transparent)]
    Validation(#[from] UserValidationError),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Required tables and their columns for one repository.
pub(crate) type SchemaRequirement = (&'static str, &'static [&'static str]);

/// Verifies migrations ran and the listed tables/columns exist.
pub(crate) fn ensure_connection_ready(
    conn: &Connection,
    requirements: &[SchemaRequirement],
) -> RepoResult<()> {
    let expected = latest_version();
    let actual = current_user_version(conn)?;
    if actual != expected {
        return Err(RepoError::UninitializedConnection { expected, actual });
    }

    for &(table, columns) in requirements {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(RepoError::MissingRequiredColumn { table, column });
            }
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn to_epoch_ms(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub(crate) fn from_epoch_ms(value: i64, column: &str) -> RepoResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| {
        RepoError::InvalidData(format!("timestamp `{value}` out of range in {column}"))
    })
}

pub(crate) fn from_optional_epoch_ms(
    value: Option<i64>,
    column: &str,
) -> RepoResult<Option<DateTime<Utc>>> {
    value.map(|ms| from_epoch_ms(ms, column)).transpose()
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

pub(crate) fn int_to_u32(value: i64, column: &str) -> RepoResult<u32> {
    u32::try_from(value).map_err(|_| {
        RepoError::InvalidData(format!("invalid quota value `{value}` in {column}"))
    })
}
