//! Organization lifecycle and policy service.
//!
//! # Responsibility
//! - Enforce creation limits and personal-organization uniqueness.
//! - Apply suspension, quota and deletion policies.
//! - Expose the organization queries used by callers and sweeps.
//!
//! # Invariants
//! - Creation is one atomic unit: guards, organization row and owner
//!   membership commit together or not at all.
//! - Every mutation returns the persisted state read back from storage.
//! - Suspension checks use `Organization::is_suspended` (expiry-aware).

use crate::model::now_utc;
use crate::model::organization::{Organization, OrganizationId, QuotaUpdate, UsageOverview};
use crate::model::organization_user::{MemberRole, OrganizationUser};
use crate::model::user::UserId;
use crate::repo::organization_repo::{
    OrganizationListQuery, OrganizationRepository, SuspensionWindow,
};
use crate::repo::RepoError;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use thiserror::Error;

/// Upper bound on organizations one user may create.
pub const MAX_CREATED_ORGANIZATIONS: u64 = 10;
/// Upper bound on rows returned by a suspension sweep.
pub const SUSPENDED_SCAN_LIMIT: u32 = 100;
/// Reason recorded when the creator has not verified their email.
pub const EMAIL_VERIFICATION_REASON: &str = "Please verify your email address";

pub type ServiceResult<T> = Result<T, OrganizationServiceError>;

#[derive(Debug, Error)]
pub enum OrganizationServiceError {
    #[error("organization not found: {0}")]
    OrganizationNotFound(OrganizationId),
    #[error("personal organization for user {0} not found")]
    PersonalOrganizationNotFound(UserId),
    #[error("personal organization already exists for user {0}")]
    DuplicatePersonalOrganization(UserId),
    #[error("user {created_by} has reached the maximum of {limit} created organizations")]
    OrganizationLimitExceeded { created_by: UserId, limit: u64 },
    #[error("{}", suspended_message(.reason.as_deref()))]
    OrganizationSuspended { reason: Option<String> },
    #[error("cannot delete personal organization {0}")]
    CannotDeletePersonalOrganization(OrganizationId),
    #[error("inconsistent state: {0}")]
    InconsistentState(&'static str),
    #[error(transparent)]
    Repo(RepoError),
}

impl OrganizationServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::OrganizationNotFound(_) | Self::PersonalOrganizationNotFound(_)
        )
    }
}

impl From<RepoError> for OrganizationServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::OrganizationNotFound(id) => Self::OrganizationNotFound(id),
            RepoError::PersonalOrganizationExists(user_id) => {
                Self::DuplicatePersonalOrganization(user_id)
            }
            other => Self::Repo(other),
        }
    }
}

fn suspended_message(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("Organization is suspended: {reason}"),
        None => "Organization is suspended".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub created_by: UserId,
    pub personal: bool,
    pub creator_email_verified: bool,
}

/// How `delete` treats personal organizations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    #[default]
    RejectPersonal,
    Force,
}

pub struct OrganizationService<R: OrganizationRepository> {
    repo: R,
}

impl<R: OrganizationRepository> OrganizationService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Creates an organization owned by `request.created_by`.
    ///
    /// # Errors
    /// - `DuplicatePersonalOrganization` when a personal organization
    ///   already exists (from the count guard or the unique index).
    /// - `OrganizationLimitExceeded` at [`MAX_CREATED_ORGANIZATIONS`].
    pub fn create(&self, request: &CreateOrganizationRequest) -> ServiceResult<Organization> {
        let result = self.repo.atomically(|repo| -> ServiceResult<Organization> {
            let created_by = request.created_by.as_str();

            if request.personal && repo.count_created_by(created_by, true)? >= 1 {
                return Err(OrganizationServiceError::DuplicatePersonalOrganization(
                    request.created_by.clone(),
                ));
            }

            if repo.count_created_by(created_by, false)? >= MAX_CREATED_ORGANIZATIONS {
                return Err(OrganizationServiceError::OrganizationLimitExceeded {
                    created_by: request.created_by.clone(),
                    limit: MAX_CREATED_ORGANIZATIONS,
                });
            }

            let mut organization =
                Organization::new(request.name.clone(), created_by, request.personal);
            if !request.creator_email_verified {
                organization.apply_suspension(
                    Some(EMAIL_VERIFICATION_REASON.to_string()),
                    None,
                    organization.created_at,
                );
            }
            organization.members.push(OrganizationUser::new(
                organization.id,
                created_by,
                MemberRole::Owner,
            ));

            repo.insert(&organization)?;

            repo.get(organization.id)?
                .ok_or(OrganizationServiceError::InconsistentState(
                    "organization missing after create",
                ))
        });

        match &result {
            Ok(organization) => info!(
                "event=org_create module=service status=ok org_id={} personal={} suspended={}",
                organization.id, organization.personal, organization.suspended
            ),
            Err(err) => warn!(
                "event=org_create module=service status=rejected personal={} error={}",
                request.personal, err
            ),
        }
        result
    }

    /// Overwrites the quota fields present in `update`.
    pub fn update_quota(
        &self,
        id: OrganizationId,
        update: &QuotaUpdate,
    ) -> ServiceResult<Organization> {
        let organization = self.repo.atomically(|repo| -> ServiceResult<Organization> {
            let mut organization = load(repo, id)?;
            update.apply(&mut organization.quota);
            repo.update(&organization)?;
            reload(repo, id)
        })?;

        info!(
            "event=org_update_quota module=service status=ok org_id={id} total_cpu={} total_memory={} total_disk={}",
            organization.quota.total_cpu_quota,
            organization.quota.total_memory_quota,
            organization.quota.total_disk_quota
        );
        Ok(organization)
    }

    /// Suspends the organization as of now; re-suspending overwrites.
    ///
    /// An empty `reason` is stored as no reason.
    pub fn suspend(
        &self,
        id: OrganizationId,
        reason: Option<String>,
        until: Option<DateTime<Utc>>,
    ) -> ServiceResult<Organization> {
        let organization = self.repo.atomically(|repo| -> ServiceResult<Organization> {
            let mut organization = load(repo, id)?;
            organization.apply_suspension(reason, until, now_utc());
            repo.update(&organization)?;
            reload(repo, id)
        })?;

        info!(
            "event=org_suspend module=service status=ok org_id={id} has_reason={} has_until={}",
            organization.suspension_reason.is_some(),
            organization.suspended_until.is_some()
        );
        Ok(organization)
    }

    /// Lifts suspension and clears its metadata. Idempotent.
    pub fn unsuspend(&self, id: OrganizationId) -> ServiceResult<Organization> {
        let organization = self.repo.atomically(|repo| -> ServiceResult<Organization> {
            let mut organization = load(repo, id)?;
            organization.clear_suspension();
            repo.update(&organization)?;
            reload(repo, id)
        })?;

        info!("event=org_unsuspend module=service status=ok org_id={id}");
        Ok(organization)
    }

    /// Fails with `OrganizationSuspended` while `organization` is
    /// effectively suspended.
    pub fn assert_organization_is_not_suspended(
        &self,
        organization: &Organization,
    ) -> ServiceResult<()> {
        if organization.is_suspended() {
            return Err(OrganizationServiceError::OrganizationSuspended {
                reason: organization.suspension_reason.clone(),
            });
        }
        Ok(())
    }

    /// Deletes an organization; memberships are removed by cascade.
    pub fn delete(&self, id: OrganizationId, policy: DeletePolicy) -> ServiceResult<()> {
        let result = self.repo.atomically(|repo| -> ServiceResult<()> {
            let organization = load(repo, id)?;
            if organization.personal && policy == DeletePolicy::RejectPersonal {
                return Err(OrganizationServiceError::CannotDeletePersonalOrganization(id));
            }
            repo.delete(id)?;
            Ok(())
        });

        match &result {
            Ok(()) => info!(
                "event=org_delete module=service status=ok org_id={id} policy={policy:?}"
            ),
            Err(err) => warn!(
                "event=org_delete module=service status=rejected org_id={id} error={err}"
            ),
        }
        result
    }

    pub fn find_one(&self, id: OrganizationId) -> ServiceResult<Option<Organization>> {
        Ok(self.repo.get(id)?)
    }

    /// Organizations `user_id` is a member of.
    pub fn find_by_user(&self, user_id: &str) -> ServiceResult<Vec<Organization>> {
        Ok(self.repo.list(&OrganizationListQuery {
            member: Some(user_id.to_string()),
            ..OrganizationListQuery::default()
        })?)
    }

    pub fn find_personal(&self, user_id: &str) -> ServiceResult<Organization> {
        self.repo.find_personal(user_id)?.ok_or_else(|| {
            OrganizationServiceError::PersonalOrganizationNotFound(user_id.to_string())
        })
    }

    /// Organizations with at least one member holding `role`.
    pub fn find_by_user_role(&self, role: MemberRole) -> ServiceResult<Vec<Organization>> {
        Ok(self.repo.list(&OrganizationListQuery {
            member_role: Some(role),
            ..OrganizationListQuery::default()
        })?)
    }

    pub fn find_with_members(&self) -> ServiceResult<Vec<Organization>> {
        Ok(self.repo.list(&OrganizationListQuery {
            has_members: Some(true),
            ..OrganizationListQuery::default()
        })?)
    }

    /// Suspended organizations whose suspension started between
    /// `max_days_ago` and `days_ago` days back (both bounds exclusive).
    pub fn find_suspended(
        &self,
        days_ago: u32,
        max_days_ago: u32,
    ) -> ServiceResult<Vec<Organization>> {
        let now = now_utc();
        let window = SuspensionWindow {
            after: days_before(now, max_days_ago),
            before: days_before(now, days_ago),
            limit: SUSPENDED_SCAN_LIMIT,
        };
        Ok(self.repo.find_suspended_between(&window)?)
    }

    pub fn usage_overview(&self, id: OrganizationId) -> ServiceResult<UsageOverview> {
        Ok(load(&self.repo, id)?.usage_overview())
    }
}

/// `days` days before `now`, saturating at the earliest representable instant.
fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn load<R: OrganizationRepository>(repo: &R, id: OrganizationId) -> ServiceResult<Organization> {
    repo.get(id)?
        .ok_or(OrganizationServiceError::OrganizationNotFound(id))
}

fn reload<R: OrganizationRepository>(repo: &R, id: OrganizationId) -> ServiceResult<Organization> {
    repo.get(id)?
        .ok_or(OrganizationServiceError::InconsistentState(
            "organization missing after update",
        ))
}
