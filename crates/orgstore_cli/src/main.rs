//! `orgstore` command-line entry point.
//!
//! # Responsibility
//! - Drive the core crate as an external caller: seed, clear, inspect and
//!   sweep an organization store selected by `ORGSTORE_*` variables.
//! - Keep output line-oriented and deterministic for scripting.

use anyhow::{bail, Context, Result};
use orgstore_core::{
    clear_database, init_logging, open_with_config, reset_demo_data, AppConfig, Connection,
    OrganizationListQuery, OrganizationRepository, OrganizationService,
    SqliteOrganizationRepository, SqliteStatsRepository, StatsRepository,
};

const USAGE: &str = "usage: orgstore <version|setup|clean --yes|overview|sweep [days_ago] [max_days_ago]>";
const DEFAULT_SWEEP_DAYS_AGO: u32 = 1;
const DEFAULT_SWEEP_MAX_DAYS_AGO: u32 = 7;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        bail!("{USAGE}");
    };

    if command == "version" {
        println!("orgstore_core version={}", orgstore_core::core_version());
        return Ok(());
    }

    let config = AppConfig::from_env().context("invalid ORGSTORE_* configuration")?;
    if let Some(logging) = &config.logging {
        init_logging(logging).context("failed to initialize logging")?;
    }
    let mut conn = open_with_config(&config.database).context("failed to open database")?;

    let outcome = match command {
        "setup" => setup(&mut conn),
        "clean" => clean(&mut conn, &args[1..]),
        "overview" => overview(&conn),
        "sweep" => sweep(&conn, &args[1..]),
        other => bail!("unknown command `{other}`\n{USAGE}"),
    };

    if let Err(err) = &outcome {
        log::error!("event=cli_command module=cli status=error command={command} error={err:#}");
    }
    outcome
}

fn setup(conn: &mut Connection) -> Result<()> {
    let summary = reset_demo_data(conn)?;

    println!("users={}", summary.users.len());
    for user in &summary.users {
        println!(
            "  user id={} role={} email_verified={}",
            user.id,
            user.role.as_str(),
            user.email_verified
        );
    }
    println!("organizations={}", summary.organizations.len());
    for organization in &summary.organizations {
        println!(
            "  organization name={:?} personal={} suspended={}",
            organization.name, organization.personal, organization.suspended
        );
    }
    println!("memberships={}", summary.memberships);
    Ok(())
}

fn clean(conn: &mut Connection, args: &[String]) -> Result<()> {
    if !args.iter().any(|arg| arg == "--yes") {
        bail!("refusing to clear the database without --yes");
    }
    clear_database(conn)?;
    println!("database cleared");
    Ok(())
}

fn overview(conn: &Connection) -> Result<()> {
    let stats = SqliteStatsRepository::try_new(conn)?;
    let counts = stats.entity_counts()?;
    println!(
        "users={} organizations={} memberships={}",
        counts.users, counts.organizations, counts.memberships
    );

    for stat in stats.role_statistics()? {
        println!(
            "role={} organizations={} members={}",
            stat.role.as_str(),
            stat.organization_count,
            stat.member_count
        );
    }

    let organizations = SqliteOrganizationRepository::try_new(conn)?;
    for organization in organizations.list(&OrganizationListQuery::default())? {
        let status = if organization.is_suspended() {
            "suspended"
        } else {
            "active"
        };
        println!(
            "organization name={:?} personal={} status={} members={} cpu={}",
            organization.name,
            organization.personal,
            status,
            organization.members.len(),
            organization.quota.total_cpu_quota
        );
    }
    Ok(())
}

fn sweep(conn: &Connection, args: &[String]) -> Result<()> {
    let days_ago = parse_days(args.first(), DEFAULT_SWEEP_DAYS_AGO, "days_ago")?;
    let max_days_ago = parse_days(args.get(1), DEFAULT_SWEEP_MAX_DAYS_AGO, "max_days_ago")?;
    if max_days_ago < days_ago {
        bail!("max_days_ago ({max_days_ago}) must not be smaller than days_ago ({days_ago})");
    }

    let service = OrganizationService::new(SqliteOrganizationRepository::try_new(conn)?);
    let found = service.find_suspended(days_ago, max_days_ago)?;
    println!("suspended organizations in window={}", found.len());
    for organization in found {
        println!(
            "  organization name={:?} reason={:?} suspended_at={}",
            organization.name,
            organization.suspension_reason.as_deref().unwrap_or(""),
            organization
                .suspended_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn parse_days(value: Option<&String>, default: u32, name: &str) -> Result<u32> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u32>()
            .with_context(|| format!("{name} must be a non-negative integer, got `{raw}`")),
    }
}
