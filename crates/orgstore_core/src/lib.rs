//! Core organization store: users, organizations and memberships.
//! This crate is the single source of truth for organization policy.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod seed;
pub mod service;

pub use config::{AppConfig, ConfigError, DatabaseConfig, DatabaseLocation, LoggingConfig};
pub use db::{
    clear_database, open_db, open_db_in_memory, open_with_config, DbError, DbResult, SubUnit,
    UnitOfWork,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::organization::{
    Organization, OrganizationId, OrganizationQuota, QuotaUpdate, ResourceUsage, SandboxRequest,
    UsageOverview,
};
pub use model::organization_user::{MemberRole, OrganizationUser};
pub use model::user::{SystemRole, User, UserId, UserKeyPair, UserPublicKey, UserValidationError};
pub use repo::organization_repo::{
    OrganizationListQuery, OrganizationRepository, SqliteOrganizationRepository,
    SuspensionWindow,
};
pub use repo::stats_repo::{SqliteStatsRepository, StatsRepository};
pub use repo::user_repo::{SqliteUserRepository, UserListQuery, UserRepository};
pub use repo::{RepoError, RepoResult};
pub use rusqlite::Connection;
pub use seed::{reset_demo_data, seed_demo_data, SeedSummary};
pub use service::organization_service::{
    CreateOrganizationRequest, DeletePolicy, OrganizationService, OrganizationServiceError,
    ServiceResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
