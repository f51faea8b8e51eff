use chrono::{Duration, Utc};
use orgstore_core::db::open_db_in_memory;
use orgstore_core::{
    MemberRole, Organization, OrganizationListQuery, OrganizationRepository, OrganizationUser,
    QuotaUpdate, RepoError, SqliteOrganizationRepository, SqliteUserRepository,
    SuspensionWindow, User, UserRepository,
};
use rusqlite::Connection;
use uuid::Uuid;

fn setup_users(conn: &Connection, ids: &[&str]) {
    let users = SqliteUserRepository::try_new(conn).unwrap();
    for id in ids {
        users.insert(&User::new(*id, id.to_uppercase())).unwrap();
    }
}

fn with_owner(mut organization: Organization) -> Organization {
    let owner = OrganizationUser::new(
        organization.id,
        organization.created_by.clone(),
        MemberRole::Owner,
    );
    organization.members.push(owner);
    organization
}

#[test]
fn insert_and_get_loads_members() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    let organization = with_owner(Organization::new("Acme", "alice", false));
    repo.insert(&organization).unwrap();

    let loaded = repo.get(organization.id).unwrap().unwrap();
    assert_eq!(loaded, organization);
    assert_eq!(loaded.owner().unwrap().user_id, "alice");
    assert!(repo.get(Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn second_personal_organization_maps_to_semantic_error() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    repo.insert(&Organization::new("Personal", "alice", true))
        .unwrap();
    let err = repo
        .insert(&Organization::new("Personal again", "alice", true))
        .unwrap_err();

    assert!(matches!(err, RepoError::PersonalOrganizationExists(user) if user == "alice"));
    assert_eq!(repo.count_created_by("alice", true).unwrap(), 1);

    repo.insert(&Organization::new("Business", "alice", false))
        .unwrap();
    assert_eq!(repo.count_created_by("alice", false).unwrap(), 2);
}

#[test]
fn failed_member_insert_rolls_back_organization_row() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    // owner user does not exist, so the membership FK fails
    let organization = with_owner(Organization::new("Orphan", "nobody", false));
    assert!(repo.insert(&organization).is_err());
    assert!(repo.get(organization.id).unwrap().is_none());
}

#[test]
fn update_persists_scalar_fields() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    let mut organization = with_owner(Organization::new("Acme", "alice", false));
    repo.insert(&organization).unwrap();

    organization.name = "Acme Corp".to_string();
    organization.telemetry_enabled = false;
    organization.quota.total_cpu_quota = 64;
    organization.apply_suspension(Some("Billing".to_string()), None, Utc::now());
    repo.update(&organization).unwrap();

    let loaded = repo.get(organization.id).unwrap().unwrap();
    assert_eq!(loaded.name, "Acme Corp");
    assert!(!loaded.telemetry_enabled);
    assert_eq!(loaded.quota.total_cpu_quota, 64);
    assert!(loaded.suspended);
    assert_eq!(loaded.suspension_reason.as_deref(), Some("Billing"));
    assert_eq!(loaded.members.len(), 1);

    let missing = Organization::new("Ghost", "alice", false);
    assert!(matches!(
        repo.update(&missing).unwrap_err(),
        RepoError::OrganizationNotFound(id) if id == missing.id
    ));
}

#[test]
fn bulk_quota_update_targets_one_creator() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice", "bob"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    repo.insert_batch(&[
        Organization::new("A1", "alice", false),
        Organization::new("A2", "alice", false),
        Organization::new("B1", "bob", false),
    ])
    .unwrap();

    let update = QuotaUpdate {
        total_disk_quota: Some(99),
        ..QuotaUpdate::default()
    };
    assert_eq!(repo.update_quota_by_creator("alice", &update).unwrap(), 2);
    assert_eq!(
        repo.update_quota_by_creator("alice", &QuotaUpdate::default())
            .unwrap(),
        0
    );

    let alice_orgs = repo
        .list(&OrganizationListQuery {
            created_by: Some("alice".to_string()),
            ..OrganizationListQuery::default()
        })
        .unwrap();
    assert!(alice_orgs
        .iter()
        .all(|organization| organization.quota.total_disk_quota == 99));

    let bob_orgs = repo
        .list(&OrganizationListQuery {
            created_by: Some("bob".to_string()),
            ..OrganizationListQuery::default()
        })
        .unwrap();
    assert_eq!(bob_orgs[0].quota.total_disk_quota, 30);
}

#[test]
fn list_filters_by_membership_and_role() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice", "bob"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    let shared = with_owner(Organization::new("Shared", "alice", false));
    let solo = with_owner(Organization::new("Solo", "alice", false));
    let empty = Organization::new("Empty", "bob", false);
    repo.insert_batch(&[shared.clone(), solo.clone(), empty.clone()])
        .unwrap();
    repo.add_member(&OrganizationUser::new(shared.id, "bob", MemberRole::Admin))
        .unwrap();

    let bob_member_of = repo
        .list(&OrganizationListQuery {
            member: Some("bob".to_string()),
            ..OrganizationListQuery::default()
        })
        .unwrap();
    assert_eq!(bob_member_of.len(), 1);
    assert_eq!(bob_member_of[0].id, shared.id);
    assert_eq!(bob_member_of[0].members.len(), 2);

    let with_admins = repo
        .list(&OrganizationListQuery {
            member_role: Some(MemberRole::Admin),
            ..OrganizationListQuery::default()
        })
        .unwrap();
    assert_eq!(with_admins.len(), 1);

    let without_members = repo
        .list(&OrganizationListQuery {
            has_members: Some(false),
            ..OrganizationListQuery::default()
        })
        .unwrap();
    assert_eq!(without_members.len(), 1);
    assert_eq!(without_members[0].id, empty.id);

    let paged = repo
        .list(&OrganizationListQuery {
            limit: Some(2),
            offset: 2,
            ..OrganizationListQuery::default()
        })
        .unwrap();
    assert_eq!(paged.len(), 1);
}

#[test]
fn find_personal_returns_only_personal_organization() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    assert!(repo.find_personal("alice").unwrap().is_none());
    repo.insert(&Organization::new("Business", "alice", false))
        .unwrap();
    let personal = with_owner(Organization::new("Personal", "alice", true));
    repo.insert(&personal).unwrap();

    let found = repo.find_personal("alice").unwrap().unwrap();
    assert_eq!(found.id, personal.id);
    assert_eq!(found.members.len(), 1);
}

#[test]
fn suspension_window_is_exclusive_and_limited() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();
    let now = Utc::now();

    let mut recent = Organization::new("Recent", "alice", false);
    recent.apply_suspension(None, None, now - Duration::hours(2));
    let mut in_window = Organization::new("In window", "alice", false);
    in_window.apply_suspension(Some("Billing".to_string()), None, now - Duration::days(3));
    let mut too_old = Organization::new("Too old", "alice", false);
    too_old.apply_suspension(None, None, now - Duration::days(30));
    let active = Organization::new("Active", "alice", false);
    repo.insert_batch(&[recent, in_window.clone(), too_old, active])
        .unwrap();

    let window = SuspensionWindow {
        after: now - Duration::days(7),
        before: now - Duration::days(1),
        limit: 100,
    };
    let found = repo.find_suspended_between(&window).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, in_window.id);

    let none = repo
        .find_suspended_between(&SuspensionWindow { limit: 0, ..window })
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn membership_lifecycle() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice", "bob", "carol"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    let organization = with_owner(Organization::new("Acme", "alice", false));
    repo.insert(&organization).unwrap();

    assert_eq!(
        repo.add_members(&[
            OrganizationUser::new(organization.id, "bob", MemberRole::Member),
            OrganizationUser::new(organization.id, "carol", MemberRole::Member),
        ])
        .unwrap(),
        2
    );

    repo.update_member_role(organization.id, "bob", MemberRole::Admin)
        .unwrap();
    repo.remove_member(organization.id, "carol").unwrap();

    let members = repo.list_members(organization.id).unwrap();
    assert_eq!(members.len(), 2);
    let bob = members.iter().find(|member| member.user_id == "bob").unwrap();
    assert!(bob.has_admin_access());

    assert!(matches!(
        repo.remove_member(organization.id, "carol").unwrap_err(),
        RepoError::MembershipNotFound { .. }
    ));
    assert!(matches!(
        repo.add_member(&OrganizationUser::new(organization.id, "ghost", MemberRole::Member))
            .unwrap_err(),
        RepoError::UserNotFound(_)
    ));
    assert!(matches!(
        repo.add_member(&OrganizationUser::new(Uuid::new_v4(), "bob", MemberRole::Member))
            .unwrap_err(),
        RepoError::OrganizationNotFound(_)
    ));
}

#[test]
fn add_members_rolls_back_on_any_failure() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice", "bob"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    let organization = Organization::new("Acme", "alice", false);
    repo.insert(&organization).unwrap();

    let result = repo.add_members(&[
        OrganizationUser::new(organization.id, "bob", MemberRole::Member),
        OrganizationUser::new(organization.id, "ghost", MemberRole::Member),
    ]);
    assert!(result.is_err());
    assert!(repo.list_members(organization.id).unwrap().is_empty());
}

#[test]
fn delete_cascades_memberships() {
    let conn = open_db_in_memory().unwrap();
    setup_users(&conn, &["alice"]);
    let repo = SqliteOrganizationRepository::try_new(&conn).unwrap();

    let organization = with_owner(Organization::new("Acme", "alice", false));
    repo.insert(&organization).unwrap();
    repo.delete(organization.id).unwrap();

    let remaining: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM organization_users WHERE organization_id = ?1;",
            [organization.id.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(matches!(
        repo.delete(organization.id).unwrap_err(),
        RepoError::OrganizationNotFound(_)
    ));
}
