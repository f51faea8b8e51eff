use orgstore_core::db::{open_db_in_memory, run_atomic, SubUnit, UnitOfWork};
use orgstore_core::{
    CreateOrganizationRequest, OrganizationService, OrganizationServiceError, RepoError,
    SqliteOrganizationRepository, SqliteUserRepository, User, UserRepository,
};
use rusqlite::Connection;

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

fn request(created_by: &str, name: &str, personal: bool) -> CreateOrganizationRequest {
    CreateOrganizationRequest {
        name: name.to_string(),
        created_by: created_by.to_string(),
        personal,
        creator_email_verified: true,
    }
}

#[test]
fn uncommitted_unit_rolls_back_on_drop() {
    let mut conn = open_db_in_memory().unwrap();
    {
        let unit = UnitOfWork::begin(&mut conn).unwrap();
        SqliteUserRepository::try_new(unit.conn())
            .unwrap()
            .insert(&User::new("temp", "Temp"))
            .unwrap();
    }
    assert_eq!(count(&conn, "users"), 0);
}

#[test]
fn committed_unit_persists_service_work() {
    let mut conn = open_db_in_memory().unwrap();
    let unit = UnitOfWork::begin(&mut conn).unwrap();
    {
        SqliteUserRepository::try_new(unit.conn())
            .unwrap()
            .insert(&User::new("alice", "Alice"))
            .unwrap();
        let service =
            OrganizationService::new(SqliteOrganizationRepository::try_new(unit.conn()).unwrap());
        service.create(&request("alice", "Acme", false)).unwrap();
    }
    unit.commit().unwrap();

    assert_eq!(count(&conn, "organizations"), 1);
    assert_eq!(count(&conn, "organization_users"), 1);
}

#[test]
fn explicit_rollback_discards_everything() {
    let mut conn = open_db_in_memory().unwrap();
    let unit = UnitOfWork::begin(&mut conn).unwrap();
    SqliteUserRepository::try_new(unit.conn())
        .unwrap()
        .insert(&User::new("alice", "Alice"))
        .unwrap();
    unit.rollback().unwrap();

    assert_eq!(count(&conn, "users"), 0);
}

#[test]
fn failed_sub_unit_keeps_outer_unit_usable() {
    let mut conn = open_db_in_memory().unwrap();
    let mut unit = UnitOfWork::begin(&mut conn).unwrap();
    SqliteUserRepository::try_new(unit.conn())
        .unwrap()
        .insert(&User::new("alice", "Alice"))
        .unwrap();

    let first = unit
        .sub_unit(|conn| {
            let service =
                OrganizationService::new(SqliteOrganizationRepository::try_new(conn)?);
            service.create(&request("alice", "Personal", true))
        })
        .unwrap();
    assert!(first.is_committed());

    let second = unit
        .sub_unit(|conn| {
            let service =
                OrganizationService::new(SqliteOrganizationRepository::try_new(conn)?);
            service.create(&request("alice", "Personal again", true))
        })
        .unwrap();
    match second {
        SubUnit::RolledBack(OrganizationServiceError::DuplicatePersonalOrganization(user)) => {
            assert_eq!(user, "alice")
        }
        other => panic!("unexpected sub-unit outcome: {other:?}"),
    }

    let fallback = unit
        .sub_unit(|conn| {
            let service =
                OrganizationService::new(SqliteOrganizationRepository::try_new(conn)?);
            service.create(&request("alice", "Business", false))
        })
        .unwrap()
        .into_result()
        .unwrap();
    assert!(!fallback.personal);

    unit.commit().unwrap();
    assert_eq!(count(&conn, "organizations"), 2);
    assert_eq!(count(&conn, "organization_users"), 2);
}

#[test]
fn run_atomic_nests_inside_existing_transaction() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch("BEGIN;").unwrap();

    let outcome: Result<(), RepoError> = run_atomic(&conn, || {
        SqliteUserRepository::try_new(&conn)?.insert(&User::new("inner", "Inner"))?;
        Err(RepoError::InvalidData("abort inner work".to_string()))
    });
    assert!(outcome.is_err());
    assert!(!conn.is_autocommit());

    SqliteUserRepository::try_new(&conn)
        .unwrap()
        .insert(&User::new("outer", "Outer"))
        .unwrap();
    conn.execute_batch("COMMIT;").unwrap();

    let users = SqliteUserRepository::try_new(&conn).unwrap();
    assert!(users.get("inner").unwrap().is_none());
    assert!(users.get("outer").unwrap().is_some());
}
