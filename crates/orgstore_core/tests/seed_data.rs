use orgstore_core::db::{clear_database, open_db_in_memory};
use orgstore_core::seed::{reset_demo_data, seed_demo_data, JANE_USER_ID, JOHN_USER_ID};
use orgstore_core::{
    OrganizationService, SqliteOrganizationRepository, SqliteUserRepository, UserRepository,
};

#[test]
fn seed_creates_demo_data_set() {
    let conn = open_db_in_memory().unwrap();
    let summary = seed_demo_data(&conn).unwrap();

    assert_eq!(summary.users.len(), 4);
    assert_eq!(summary.organizations.len(), 5);
    assert_eq!(summary.memberships, 8);

    let suspended: Vec<&str> = summary
        .organizations
        .iter()
        .filter(|organization| organization.suspended)
        .map(|organization| organization.name.as_str())
        .collect();
    assert_eq!(suspended.len(), 2);
    assert!(suspended.contains(&"Personal (Jane)"));
    assert!(suspended.contains(&"Old Suspended Org"));

    let users = SqliteUserRepository::try_new(&conn).unwrap();
    let john = users.get(JOHN_USER_ID).unwrap().unwrap();
    assert_eq!(john.public_keys.len(), 2);
    assert!(!users.get(JANE_USER_ID).unwrap().unwrap().has_verified_email());
}

#[test]
fn seeded_suspension_is_found_by_default_sweep() {
    let conn = open_db_in_memory().unwrap();
    seed_demo_data(&conn).unwrap();
    let service = OrganizationService::new(SqliteOrganizationRepository::try_new(&conn).unwrap());

    let found = service.find_suspended(1, 7).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Old Suspended Org");
    assert_eq!(found[0].suspension_reason.as_deref(), Some("Billing issue"));

    let personal = service.find_personal(JOHN_USER_ID).unwrap();
    assert_eq!(personal.name, "Personal (John)");
}

#[test]
fn seeding_twice_fails_without_partial_writes() {
    let mut conn = open_db_in_memory().unwrap();
    seed_demo_data(&conn).unwrap();

    assert!(seed_demo_data(&conn).is_err());
    let users = SqliteUserRepository::try_new(&conn).unwrap();
    assert_eq!(users.count().unwrap(), 4);
    drop(users);

    clear_database(&mut conn).unwrap();
    let summary = seed_demo_data(&conn).unwrap();
    assert_eq!(summary.organizations.len(), 5);
}

#[test]
fn reset_replaces_existing_rows() {
    let mut conn = open_db_in_memory().unwrap();
    seed_demo_data(&conn).unwrap();

    let summary = reset_demo_data(&mut conn).unwrap();
    assert_eq!(summary.organizations.len(), 5);
    let users = SqliteUserRepository::try_new(&conn).unwrap();
    assert_eq!(users.count().unwrap(), 4);
}

#[test]
fn failed_reset_keeps_previous_contents() {
    let mut conn = open_db_in_memory().unwrap();
    seed_demo_data(&conn).unwrap();
    conn.execute_batch(
        "CREATE TEMP TRIGGER reject_memberships BEFORE INSERT ON organization_users
         BEGIN SELECT RAISE(ABORT, 'membership writes disabled'); END;",
    )
    .unwrap();

    assert!(reset_demo_data(&mut conn).is_err());

    let counts: (i64, i64, i64) = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM users),
                    (SELECT COUNT(*) FROM organizations),
                    (SELECT COUNT(*) FROM organization_users);",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(counts, (4, 5, 8));
    assert!(conn.is_autocommit());
}
