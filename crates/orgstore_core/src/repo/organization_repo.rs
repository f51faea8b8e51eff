//! Organization repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist organizations together with their membership rows (the
//!   organization is the aggregate root).
//! - Provide the counts, lookups and suspension-window scans the
//!   organization service builds its policies on.
//!
//! # Invariants
//! - Every `Organization` returned by this repository has `members` loaded.
//! - A second personal organization for one creator surfaces as
//!   `RepoError::PersonalOrganizationExists`, never as a raw constraint error.
//! - Multi-statement writes are all-or-nothing.

use super::{
    bool_to_int, ensure_connection_ready, from_epoch_ms, from_optional_epoch_ms, int_to_bool,
    int_to_u32, to_epoch_ms, RepoError, RepoResult, SchemaRequirement,
};
use crate::db::{run_atomic, DbError};
use crate::model::now_utc;
use crate::model::organization::{
    Organization, OrganizationId, OrganizationQuota, QuotaUpdate,
};
use crate::model::organization_user::{MemberRole, OrganizationUser};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row};
use uuid::Uuid;

const ORGANIZATION_SELECT_SQL: &str = "SELECT
    o.id,
    o.name,
    o.created_by,
    o.personal,
    o.telemetry_enabled,
    o.total_cpu_quota,
    o.total_memory_quota,
    o.total_disk_quota,
    o.max_cpu_per_sandbox,
    o.max_memory_per_sandbox,
    o.max_disk_per_sandbox,
    o.max_snapshot_size,
    o.snapshot_quota,
    o.volume_quota,
    o.suspended,
    o.suspended_at,
    o.suspension_reason,
    o.suspended_until,
    o.created_at,
    o.updated_at
FROM organizations o";

const MEMBER_SELECT_SQL: &str = "SELECT
    organization_id,
    user_id,
    role,
    created_at,
    updated_at
FROM organization_users";

const REQUIRED_SCHEMA: &[SchemaRequirement] = &[
    ("users", &["id"]),
    (
        "organizations",
        &[
            "id",
            "name",
            "created_by",
            "personal",
            "telemetry_enabled",
            "total_cpu_quota",
            "total_memory_quota",
            "total_disk_quota",
            "max_cpu_per_sandbox",
            "max_memory_per_sandbox",
            "max_disk_per_sandbox",
            "max_snapshot_size",
            "snapshot_quota",
            "volume_quota",
            "suspended",
            "suspended_at",
            "suspension_reason",
            "suspended_until",
            "created_at",
            "updated_at",
        ],
    ),
    (
        "organization_users",
        &["organization_id", "user_id", "role", "created_at", "updated_at"],
    ),
];

const PERSONAL_UNIQUE_MARKER: &str = "organizations.created_by";

/// Filters for listing organizations. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct OrganizationListQuery {
    pub created_by: Option<String>,
    pub personal: Option<bool>,
    /// Stored `suspended` flag, not the expiry-aware predicate.
    pub suspended: Option<bool>,
    /// Only organizations this user is a member of.
    pub member: Option<String>,
    /// Only organizations with at least one member holding this role.
    pub member_role: Option<MemberRole>,
    pub has_members: Option<bool>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Open interval on `suspended_at`: `after < suspended_at < before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspensionWindow {
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
    pub limit: u32,
}

pub trait OrganizationRepository {
    /// Runs `work` as one atomic unit against this repository.
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>;

    /// Inserts the organization row and every entry of `members`.
    fn insert(&self, organization: &Organization) -> RepoResult<()>;
    fn insert_batch(&self, organizations: &[Organization]) -> RepoResult<usize>;
    /// Persists scalar fields; membership rows are left untouched.
    fn update(&self, organization: &Organization) -> RepoResult<()>;
    /// Applies `update` to every organization created by `created_by`.
    fn update_quota_by_creator(&self, created_by: &str, update: &QuotaUpdate)
        -> RepoResult<usize>;
    fn delete(&self, id: OrganizationId) -> RepoResult<()>;
    fn get(&self, id: OrganizationId) -> RepoResult<Option<Organization>>;
    fn list(&self, query: &OrganizationListQuery) -> RepoResult<Vec<Organization>>;
    fn count_created_by(&self, created_by: &str, personal_only: bool) -> RepoResult<u64>;
    fn find_personal(&self, created_by: &str) -> RepoResult<Option<Organization>>;
    /// Suspended organizations inside `window`, oldest suspension first.
    fn find_suspended_between(&self, window: &SuspensionWindow)
        -> RepoResult<Vec<Organization>>;

    fn add_member(&self, member: &OrganizationUser) -> RepoResult<()>;
    fn add_members(&self, members: &[OrganizationUser]) -> RepoResult<usize>;
    fn update_member_role(
        &self,
        organization_id: OrganizationId,
        user_id: &str,
        role: MemberRole,
    ) -> RepoResult<()>;
    fn remove_member(&self, organization_id: OrganizationId, user_id: &str) -> RepoResult<()>;
    fn list_members(&self, organization_id: OrganizationId) -> RepoResult<Vec<OrganizationUser>>;
}

pub struct SqliteOrganizationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOrganizationRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &'conn Connection {
        self.conn
    }

    fn insert_organization_row(&self, organization: &Organization) -> RepoResult<()> {
        let quota = &organization.quota;
        self.conn
            .execute(
                "INSERT INTO organizations (
                    id,
                    name,
                    created_by,
                    personal,
                    telemetry_enabled,
                    total_cpu_quota,
                    total_memory_quota,
                    total_disk_quota,
                    max_cpu_per_sandbox,
                    max_memory_per_sandbox,
                    max_disk_per_sandbox,
                    max_snapshot_size,
                    snapshot_quota,
                    volume_quota,
                    suspended,
                    suspended_at,
                    suspension_reason,
                    suspended_until,
                    created_at,
                    updated_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                    ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20
                );",
                params![
                    organization.id.to_string(),
                    organization.name.as_str(),
                    organization.created_by.as_str(),
                    bool_to_int(organization.personal),
                    bool_to_int(organization.telemetry_enabled),
                    quota.total_cpu_quota,
                    quota.total_memory_quota,
                    quota.total_disk_quota,
                    quota.max_cpu_per_sandbox,
                    quota.max_memory_per_sandbox,
                    quota.max_disk_per_sandbox,
                    quota.max_snapshot_size,
                    quota.snapshot_quota,
                    quota.volume_quota,
                    bool_to_int(organization.suspended),
                    organization.suspended_at.map(to_epoch_ms),
                    organization.suspension_reason.as_deref(),
                    organization.suspended_until.map(to_epoch_ms),
                    to_epoch_ms(organization.created_at),
                    to_epoch_ms(organization.updated_at),
                ],
            )
            .map_err(|err| map_insert_error(err, organization))?;

        for member in &organization.members {
            if member.organization_id != organization.id {
                return Err(RepoError::InvalidData(format!(
                    "member `{}` belongs to organization {}, not {}",
                    member.user_id, member.organization_id, organization.id
                )));
            }
            self.insert_member_row(member)?;
        }
        Ok(())
    }

    fn insert_member_row(&self, member: &OrganizationUser) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO organization_users (
                organization_id,
                user_id,
                role,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                member.organization_id.to_string(),
                member.user_id.as_str(),
                member.role.as_str(),
                to_epoch_ms(member.created_at),
                to_epoch_ms(member.updated_at),
            ],
        )?;
        Ok(())
    }

    fn exists(&self, table: &str, id: &str) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1);"),
            [id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn query_organizations(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Organization>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut organizations = Vec::new();
        while let Some(row) = rows.next()? {
            organizations.push(parse_organization_row(row)?);
        }
        drop(rows);

        for organization in &mut organizations {
            organization.members = self.list_members(organization.id)?;
        }
        Ok(organizations)
    }
}

enum AtomicFailure<E> {
    Work(E),
    Db(DbError),
}

impl<E> From<DbError> for AtomicFailure<E> {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl OrganizationRepository for SqliteOrganizationRepository<'_> {
    fn atomically<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>,
    {
        run_atomic(self.conn, || work(self).map_err(AtomicFailure::Work)).map_err(|failure| {
            match failure {
                AtomicFailure::Work(err) => err,
                AtomicFailure::Db(err) => E::from(RepoError::Db(err)),
            }
        })
    }

    fn insert(&self, organization: &Organization) -> RepoResult<()> {
        run_atomic(self.conn, || self.insert_organization_row(organization))
    }

    fn insert_batch(&self, organizations: &[Organization]) -> RepoResult<usize> {
        run_atomic(self.conn, || {
            for organization in organizations {
                self.insert_organization_row(organization)?;
            }
            Ok(organizations.len())
        })
    }

    fn update(&self, organization: &Organization) -> RepoResult<()> {
        let quota = &organization.quota;
        let changed = self.conn.execute(
            "UPDATE organizations
             SET
                name = ?1,
                personal = ?2,
                telemetry_enabled = ?3,
                total_cpu_quota = ?4,
                total_memory_quota = ?5,
                total_disk_quota = ?6,
                max_cpu_per_sandbox = ?7,
                max_memory_per_sandbox = ?8,
                max_disk_per_sandbox = ?9,
                max_snapshot_size = ?10,
                snapshot_quota = ?11,
                volume_quota = ?12,
                suspended = ?13,
                suspended_at = ?14,
                suspension_reason = ?15,
                suspended_until = ?16,
                updated_at = ?17
             WHERE id = ?18;",
            params![
                organization.name.as_str(),
                bool_to_int(organization.personal),
                bool_to_int(organization.telemetry_enabled),
                quota.total_cpu_quota,
                quota.total_memory_quota,
                quota.total_disk_quota,
                quota.max_cpu_per_sandbox,
                quota.max_memory_per_sandbox,
                quota.max_disk_per_sandbox,
                quota.max_snapshot_size,
                quota.snapshot_quota,
                quota.volume_quota,
                bool_to_int(organization.suspended),
                organization.suspended_at.map(to_epoch_ms),
                organization.suspension_reason.as_deref(),
                organization.suspended_until.map(to_epoch_ms),
                to_epoch_ms(now_utc()),
                organization.id.to_string(),
            ],
        )
        .map_err(|err| map_insert_error(err, organization))?;

        if changed == 0 {
            return Err(RepoError::OrganizationNotFound(organization.id));
        }
        Ok(())
    }

    fn update_quota_by_creator(
        &self,
        created_by: &str,
        update: &QuotaUpdate,
    ) -> RepoResult<usize> {
        let fields: [(&str, Option<u32>); 9] = [
            ("total_cpu_quota", update.total_cpu_quota),
            ("total_memory_quota", update.total_memory_quota),
            ("total_disk_quota", update.total_disk_quota),
            ("max_cpu_per_sandbox", update.max_cpu_per_sandbox),
            ("max_memory_per_sandbox", update.max_memory_per_sandbox),
            ("max_disk_per_sandbox", update.max_disk_per_sandbox),
            ("max_snapshot_size", update.max_snapshot_size),
            ("snapshot_quota", update.snapshot_quota),
            ("volume_quota", update.volume_quota),
        ];

        let mut assignments = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();
        for (column, value) in fields {
            if let Some(value) = value {
                assignments.push(format!("{column} = ?"));
                bind_values.push(Value::Integer(i64::from(value)));
            }
        }
        if assignments.is_empty() {
            return Ok(0);
        }

        assignments.push("updated_at = ?".to_string());
        bind_values.push(Value::Integer(to_epoch_ms(now_utc())));
        bind_values.push(Value::Text(created_by.to_string()));

        let sql = format!(
            "UPDATE organizations SET {} WHERE created_by = ?;",
            assignments.join(", ")
        );
        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(changed)
    }

    fn delete(&self, id: OrganizationId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM organizations WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::OrganizationNotFound(id));
        }
        Ok(())
    }

    fn get(&self, id: OrganizationId) -> RepoResult<Option<Organization>> {
        let sql = format!("{ORGANIZATION_SELECT_SQL} WHERE o.id = ?;");
        let mut organizations =
            self.query_organizations(&sql, vec![Value::Text(id.to_string())])?;
        Ok(organizations.pop())
    }

    fn list(&self, query: &OrganizationListQuery) -> RepoResult<Vec<Organization>> {
        let mut sql = format!("{ORGANIZATION_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(created_by) = &query.created_by {
            sql.push_str(" AND o.created_by = ?");
            bind_values.push(Value::Text(created_by.clone()));
        }
        if let Some(personal) = query.personal {
            sql.push_str(" AND o.personal = ?");
            bind_values.push(Value::Integer(bool_to_int(personal)));
        }
        if let Some(suspended) = query.suspended {
            sql.push_str(" AND o.suspended = ?");
            bind_values.push(Value::Integer(bool_to_int(suspended)));
        }
        if let Some(member) = &query.member {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM organization_users m
                              WHERE m.organization_id = o.id AND m.user_id = ?)",
            );
            bind_values.push(Value::Text(member.clone()));
        }
        if let Some(role) = query.member_role {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM organization_users m
                              WHERE m.organization_id = o.id AND m.role = ?)",
            );
            bind_values.push(Value::Text(role.as_str().to_string()));
        }
        match query.has_members {
            Some(true) => sql.push_str(
                " AND EXISTS (SELECT 1 FROM organization_users m WHERE m.organization_id = o.id)",
            ),
            Some(false) => sql.push_str(
                " AND NOT EXISTS (SELECT 1 FROM organization_users m WHERE m.organization_id = o.id)",
            ),
            None => {}
        }

        sql.push_str(" ORDER BY o.created_at ASC, o.id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        self.query_organizations(&sql, bind_values)
    }

    fn count_created_by(&self, created_by: &str, personal_only: bool) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM organizations
             WHERE created_by = ?1
               AND (?2 = 0 OR personal = 1);",
            params![created_by, bool_to_int(personal_only)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn find_personal(&self, created_by: &str) -> RepoResult<Option<Organization>> {
        let sql = format!(
            "{ORGANIZATION_SELECT_SQL} WHERE o.created_by = ? AND o.personal = 1 LIMIT 1;"
        );
        let mut organizations =
            self.query_organizations(&sql, vec![Value::Text(created_by.to_string())])?;
        Ok(organizations.pop())
    }

    fn find_suspended_between(
        &self,
        window: &SuspensionWindow,
    ) -> RepoResult<Vec<Organization>> {
        let sql = format!(
            "{ORGANIZATION_SELECT_SQL}
             WHERE o.suspended = 1
               AND o.suspended_at IS NOT NULL
               AND o.suspended_at > ?
               AND o.suspended_at < ?
             ORDER BY o.suspended_at ASC, o.id ASC
             LIMIT ?;"
        );
        self.query_organizations(
            &sql,
            vec![
                Value::Integer(to_epoch_ms(window.after)),
                Value::Integer(to_epoch_ms(window.before)),
                Value::Integer(i64::from(window.limit)),
            ],
        )
    }

    fn add_member(&self, member: &OrganizationUser) -> RepoResult<()> {
        if !self.exists("organizations", &member.organization_id.to_string())? {
            return Err(RepoError::OrganizationNotFound(member.organization_id));
        }
        if !self.exists("users", &member.user_id)? {
            return Err(RepoError::UserNotFound(member.user_id.clone()));
        }
        self.insert_member_row(member)
    }

    fn add_members(&self, members: &[OrganizationUser]) -> RepoResult<usize> {
        run_atomic(self.conn, || {
            for member in members {
                self.add_member(member)?;
            }
            Ok(members.len())
        })
    }

    fn update_member_role(
        &self,
        organization_id: OrganizationId,
        user_id: &str,
        role: MemberRole,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE organization_users
             SET role = ?1, updated_at = ?2
             WHERE organization_id = ?3 AND user_id = ?4;",
            params![
                role.as_str(),
                to_epoch_ms(now_utc()),
                organization_id.to_string(),
                user_id
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::MembershipNotFound {
                organization_id,
                user_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    fn remove_member(&self, organization_id: OrganizationId, user_id: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM organization_users WHERE organization_id = ?1 AND user_id = ?2;",
            params![organization_id.to_string(), user_id],
        )?;
        if changed == 0 {
            return Err(RepoError::MembershipNotFound {
                organization_id,
                user_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    fn list_members(&self, organization_id: OrganizationId) -> RepoResult<Vec<OrganizationUser>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MEMBER_SELECT_SQL}
             WHERE organization_id = ?1
             ORDER BY created_at ASC, user_id ASC;"
        ))?;
        let mut rows = stmt.query([organization_id.to_string()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            members.push(parse_member_row(row)?);
        }
        Ok(members)
    }
}

fn map_insert_error(err: rusqlite::Error, organization: &Organization) -> RepoError {
    if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
        if failure.code == ErrorCode::ConstraintViolation
            && organization.personal
            && message.contains(PERSONAL_UNIQUE_MARKER)
        {
            return RepoError::PersonalOrganizationExists(organization.created_by.clone());
        }
    }
    err.into()
}

fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn parse_organization_row(row: &Row<'_>) -> RepoResult<Organization> {
    let id_text: String = row.get("id")?;
    let quota_field = |column: &'static str| -> RepoResult<u32> {
        int_to_u32(row.get(column)?, &format!("organizations.{column}"))
    };

    let quota = OrganizationQuota {
        total_cpu_quota: quota_field("total_cpu_quota")?,
        total_memory_quota: quota_field("total_memory_quota")?,
        total_disk_quota: quota_field("total_disk_quota")?,
        max_cpu_per_sandbox: quota_field("max_cpu_per_sandbox")?,
        max_memory_per_sandbox: quota_field("max_memory_per_sandbox")?,
        max_disk_per_sandbox: quota_field("max_disk_per_sandbox")?,
        max_snapshot_size: quota_field("max_snapshot_size")?,
        snapshot_quota: quota_field("snapshot_quota")?,
        volume_quota: quota_field("volume_quota")?,
    };

    Ok(Organization {
        id: parse_uuid(&id_text, "organizations.id")?,
        name: row.get("name")?,
        created_by: row.get("created_by")?,
        personal: int_to_bool(row.get("personal")?, "organizations.personal")?,
        telemetry_enabled: int_to_bool(
            row.get("telemetry_enabled")?,
            "organizations.telemetry_enabled",
        )?,
        quota,
        suspended: int_to_bool(row.get("suspended")?, "organizations.suspended")?,
        suspended_at: from_optional_epoch_ms(
            row.get("suspended_at")?,
            "organizations.suspended_at",
        )?,
        suspension_reason: row.get("suspension_reason")?,
        suspended_until: from_optional_epoch_ms(
            row.get("suspended_until")?,
            "organizations.suspended_until",
        )?,
        members: Vec::new(),
        created_at: from_epoch_ms(row.get("created_at")?, "organizations.created_at")?,
        updated_at: from_epoch_ms(row.get("updated_at")?, "organizations.updated_at")?,
    })
}

fn parse_member_row(row: &Row<'_>) -> RepoResult<OrganizationUser> {
    let organization_text: String = row.get("organization_id")?;
    let role_text: String = row.get("role")?;
    let role = MemberRole::parse(&role_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid role `{role_text}` in organization_users.role"
        ))
    })?;

    Ok(OrganizationUser {
        organization_id: parse_uuid(&organization_text, "organization_users.organization_id")?,
        user_id: row.get("user_id")?,
        role,
        created_at: from_epoch_ms(row.get("created_at")?, "organization_users.created_at")?,
        updated_at: from_epoch_ms(row.get("updated_at")?, "organization_users.updated_at")?,
    })
}
