//! Aggregate read models over users, organizations and memberships.
//!
//! Only non-suspended ("active") organizations contribute to role,
//! member-count, quota and participation statistics. The stored
//! `suspended` flag is used here, not the expiry-aware predicate.

use super::{ensure_connection_ready, RepoError, RepoResult, SchemaRequirement};
use crate::model::organization::OrganizationId;
use crate::model::organization_user::MemberRole;
use crate::model::user::{SystemRole, UserId};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use serde::Serialize;
use uuid::Uuid;

const REQUIRED_SCHEMA: &[SchemaRequirement] = &[
    ("users", &["id", "name", "role"]),
    (
        "organizations",
        &["id", "name", "personal", "suspended", "total_cpu_quota"],
    ),
    ("organization_users", &["organization_id", "user_id", "role"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleStatistic {
    pub role: MemberRole,
    pub organization_count: u64,
    pub member_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationMemberCount {
    pub organization_id: OrganizationId,
    pub name: String,
    pub total_cpu_quota: u32,
    pub member_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuQuotaEntry {
    pub organization_id: OrganizationId,
    pub name: String,
    pub total_cpu_quota: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserParticipation {
    pub user_id: UserId,
    pub name: String,
    pub role: SystemRole,
    pub total_organizations: u64,
    pub personal_organizations: u64,
    pub business_organizations: u64,
    pub owned_organizations: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub users: u64,
    pub organizations: u64,
    pub memberships: u64,
}

pub trait StatsRepository {
    fn role_statistics(&self) -> RepoResult<Vec<RoleStatistic>>;
    fn member_counts(&self) -> RepoResult<Vec<OrganizationMemberCount>>;
    fn above_average_cpu_quota(&self) -> RepoResult<Vec<CpuQuotaEntry>>;
    fn user_participation(&self) -> RepoResult<Vec<UserParticipation>>;
    fn entity_counts(&self) -> RepoResult<EntityCounts>;

    /// Runs arbitrary SQL and maps each row with `map`.
    fn raw_query<T, F>(&self, sql: &str, params: &[Value], map: F) -> RepoResult<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>;
}

pub struct SqliteStatsRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStatsRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_SCHEMA)?;
        Ok(Self { conn })
    }

    fn count(&self, table: &str) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
                row.get(0)
            })?;
        Ok(to_count(count))
    }
}

impl StatsRepository for SqliteStatsRepository<'_> {
    fn role_statistics(&self) -> RepoResult<Vec<RoleStatistic>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                m.role AS role,
                COUNT(DISTINCT m.organization_id) AS organization_count,
                COUNT(m.user_id) AS member_count
             FROM organization_users m
             JOIN organizations o ON o.id = m.organization_id
             WHERE o.suspended = 0
             GROUP BY m.role
             ORDER BY organization_count DESC, role ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut stats = Vec::new();
        while let Some(row) = rows.next()? {
            let role_text: String = row.get("role")?;
            let role = MemberRole::parse(&role_text).ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "invalid role `{role_text}` in organization_users.role"
                ))
            })?;
            stats.push(RoleStatistic {
                role,
                organization_count: to_count(row.get("organization_count")?),
                member_count: to_count(row.get("member_count")?),
            });
        }
        Ok(stats)
    }

    fn member_counts(&self) -> RepoResult<Vec<OrganizationMemberCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                o.id AS id,
                o.name AS name,
                o.total_cpu_quota AS total_cpu_quota,
                COUNT(m.user_id) AS member_count
             FROM organizations o
             JOIN organization_users m ON m.organization_id = o.id
             WHERE o.suspended = 0
             GROUP BY o.id, o.name, o.total_cpu_quota
             ORDER BY o.total_cpu_quota DESC, o.id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next()? {
            counts.push(OrganizationMemberCount {
                organization_id: parse_organization_id(row)?,
                name: row.get("name")?,
                total_cpu_quota: to_quota(row.get("total_cpu_quota")?)?,
                member_count: to_count(row.get("member_count")?),
            });
        }
        Ok(counts)
    }

    fn above_average_cpu_quota(&self) -> RepoResult<Vec<CpuQuotaEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                o.id AS id,
                o.name AS name,
                o.total_cpu_quota AS total_cpu_quota
             FROM organizations o
             WHERE o.suspended = 0
               AND o.total_cpu_quota > (
                    SELECT AVG(a.total_cpu_quota)
                    FROM organizations a
                    WHERE a.suspended = 0
               )
             ORDER BY o.total_cpu_quota DESC, o.id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(CpuQuotaEntry {
                organization_id: parse_organization_id(row)?,
                name: row.get("name")?,
                total_cpu_quota: to_quota(row.get("total_cpu_quota")?)?,
            });
        }
        Ok(entries)
    }

    fn user_participation(&self) -> RepoResult<Vec<UserParticipation>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                u.id AS id,
                u.name AS name,
                u.role AS role,
                COUNT(o.id) AS total_organizations,
                COUNT(CASE WHEN o.personal = 1 THEN 1 END) AS personal_organizations,
                COUNT(CASE WHEN o.personal = 0 THEN 1 END) AS business_organizations,
                COUNT(CASE WHEN o.id IS NOT NULL AND m.role = 'owner' THEN 1 END)
                    AS owned_organizations
             FROM users u
             LEFT JOIN organization_users m ON m.user_id = u.id
             LEFT JOIN organizations o ON o.id = m.organization_id AND o.suspended = 0
             GROUP BY u.id, u.name, u.role
             ORDER BY total_organizations DESC, u.id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut participation = Vec::new();
        while let Some(row) = rows.next()? {
            let role_text: String = row.get("role")?;
            let role = SystemRole::parse(&role_text).ok_or_else(|| {
                RepoError::InvalidData(format!("invalid role `{role_text}` in users.role"))
            })?;
            participation.push(UserParticipation {
                user_id: row.get("id")?,
                name: row.get("name")?,
                role,
                total_organizations: to_count(row.get("total_organizations")?),
                personal_organizations: to_count(row.get("personal_organizations")?),
                business_organizations: to_count(row.get("business_organizations")?),
                owned_organizations: to_count(row.get("owned_organizations")?),
            });
        }
        Ok(participation)
    }

    fn entity_counts(&self) -> RepoResult<EntityCounts> {
        Ok(EntityCounts {
            users: self.count("users")?,
            organizations: self.count("organizations")?,
            memberships: self.count("organization_users")?,
        })
    }

    fn raw_query<T, F>(&self, sql: &str, params: &[Value], mut map: F) -> RepoResult<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut mapped = Vec::new();
        while let Some(row) = rows.next()? {
            mapped.push(map(row)?);
        }
        Ok(mapped)
    }
}

fn parse_organization_id(row: &Row<'_>) -> RepoResult<OrganizationId> {
    let id_text: String = row.get("id")?;
    Uuid::parse_str(&id_text).map_err(|_| {
        RepoError::InvalidData(format!("invalid uuid value `{id_text}` in organizations.id"))
    })
}

fn to_quota(value: i64) -> RepoResult<u32> {
    super::int_to_u32(value, "organizations.total_cpu_quota")
}

fn to_count(value: i64) -> u64 {
    value.max(0) as u64
}
