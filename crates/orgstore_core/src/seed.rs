//! Demo data set used by `orgstore setup` and scenario tests.
//!
//! Four users, five organizations (two suspended) and eight memberships,
//! written in one atomic unit.

use crate::db::{clear_rows, run_atomic, UnitOfWork};
use crate::model::now_utc;
use crate::model::organization::{Organization, OrganizationQuota};
use crate::model::organization_user::{MemberRole, OrganizationUser};
use crate::model::user::{SystemRole, User};
use crate::repo::organization_repo::{OrganizationRepository, SqliteOrganizationRepository};
use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
use crate::repo::{RepoError, RepoResult};
use crate::service::organization_service::EMAIL_VERIFICATION_REASON;
use chrono::Duration;
use log::info;
use rusqlite::Connection;

pub const ADMIN_USER_ID: &str = "admin-user";
pub const JOHN_USER_ID: &str = "john-doe";
pub const JANE_USER_ID: &str = "jane-smith";
pub const BOB_USER_ID: &str = "bob-wilson";

#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub users: Vec<User>,
    pub organizations: Vec<Organization>,
    pub memberships: usize,
}

/// Inserts the demo data set. Expects an empty store.
pub fn seed_demo_data(conn: &Connection) -> RepoResult<SeedSummary> {
    let user_repo = SqliteUserRepository::try_new(conn)?;
    let organization_repo = SqliteOrganizationRepository::try_new(conn)?;

    let users = demo_users();
    let organizations = demo_organizations();
    let memberships = demo_memberships(&organizations);

    run_atomic(conn, || -> RepoResult<()> {
        user_repo.insert_batch(&users)?;
        organization_repo.insert_batch(&organizations)?;
        organization_repo.add_members(&memberships)?;
        Ok(())
    })?;

    let mut stored = Vec::with_capacity(organizations.len());
    for organization in &organizations {
        let loaded = organization_repo
            .get(organization.id)?
            .ok_or(RepoError::OrganizationNotFound(organization.id))?;
        stored.push(loaded);
    }

    info!(
        "event=seed module=seed status=ok users={} organizations={} memberships={}",
        users.len(),
        stored.len(),
        memberships.len()
    );

    Ok(SeedSummary {
        users,
        organizations: stored,
        memberships: memberships.len(),
    })
}

/// Replaces the whole store with the demo data set.
///
/// Clearing and seeding share one unit of work; on failure the previous
/// contents are kept.
pub fn reset_demo_data(conn: &mut Connection) -> RepoResult<SeedSummary> {
    let unit = UnitOfWork::begin(conn)?;
    clear_rows(unit.conn())?;
    let summary = seed_demo_data(unit.conn())?;
    unit.commit()?;
    info!("event=seed_reset module=seed status=ok");
    Ok(summary)
}

fn demo_users() -> Vec<User> {
    let mut admin = User::new(ADMIN_USER_ID, "Admin User")
        .with_email("admin@daytona.com", true)
        .with_role(SystemRole::Admin);
    admin.add_public_key("main", "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQ...");

    let mut john = User::new(JOHN_USER_ID, "John Doe").with_email("john@example.com", true);
    john.add_public_key("laptop", "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA...");
    john.add_public_key("desktop", "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAACAQ...");

    let jane = User::new(JANE_USER_ID, "Jane Smith").with_email("jane@example.com", false);

    let mut bob = User::new(BOB_USER_ID, "Bob Wilson").with_email("bob@example.com", true);
    bob.add_public_key("work", "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQ...");

    vec![admin, john, jane, bob]
}

fn demo_organizations() -> Vec<Organization> {
    let now = now_utc();

    let mut daytona = Organization::new("Daytona Inc", ADMIN_USER_ID, false);
    daytona.quota = OrganizationQuota {
        total_cpu_quota: 50,
        total_memory_quota: 100,
        total_disk_quota: 500,
        max_cpu_per_sandbox: 16,
        max_memory_per_sandbox: 32,
        max_disk_per_sandbox: 100,
        ..OrganizationQuota::default()
    };

    let mut john_personal = Organization::new("Personal (John)", JOHN_USER_ID, true);
    john_personal.quota.total_cpu_quota = 8;
    john_personal.quota.total_memory_quota = 16;
    john_personal.quota.total_disk_quota = 50;

    let mut jane_personal = Organization::new("Personal (Jane)", JANE_USER_ID, true);
    jane_personal.apply_suspension(
        Some(EMAIL_VERIFICATION_REASON.to_string()),
        None,
        now,
    );

    let mut dev_team = Organization::new("Development Team", JOHN_USER_ID, false);
    dev_team.quota.total_cpu_quota = 32;
    dev_team.quota.total_memory_quota = 64;
    dev_team.quota.total_disk_quota = 200;

    let mut old_suspended = Organization::new("Old Suspended Org", BOB_USER_ID, false);
    old_suspended.apply_suspension(
        Some("Billing issue".to_string()),
        None,
        now - Duration::days(3),
    );

    vec![daytona, john_personal, jane_personal, dev_team, old_suspended]
}

fn demo_memberships(organizations: &[Organization]) -> Vec<OrganizationUser> {
    let plan: [(usize, &str, MemberRole); 8] = [
        (0, ADMIN_USER_ID, MemberRole::Owner),
        (0, JOHN_USER_ID, MemberRole::Admin),
        (0, BOB_USER_ID, MemberRole::Member),
        (1, JOHN_USER_ID, MemberRole::Owner),
        (2, JANE_USER_ID, MemberRole::Owner),
        (3, JOHN_USER_ID, MemberRole::Owner),
        (3, BOB_USER_ID, MemberRole::Member),
        (4, BOB_USER_ID, MemberRole::Owner),
    ];

    plan.iter()
        .filter_map(|(index, user_id, role)| {
            organizations
                .get(*index)
                .map(|organization| OrganizationUser::new(organization.id, *user_id, *role))
        })
        .collect()
}
