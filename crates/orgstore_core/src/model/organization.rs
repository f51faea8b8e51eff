//! Organization aggregate: quotas, suspension state and memberships.
//!
//! # Responsibility
//! - Hold the persisted organization record and its loaded members.
//! - Answer suspension and sandbox-admission questions from entity state.
//!
//! # Invariants
//! - `id` is generated once and never reused.
//! - At most one `personal` organization exists per `created_by`
//!   (enforced by storage, not by this type).
//! - `is_suspended` treats an elapsed `suspended_until` as not suspended
//!   while leaving the stored `suspended` flag untouched.

use super::now_utc;
use super::organization_user::OrganizationUser;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type OrganizationId = Uuid;

/// Resource limits attached to one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationQuota {
    pub total_cpu_quota: u32,
    pub total_memory_quota: u32,
    pub total_disk_quota: u32,
    pub max_cpu_per_sandbox: u32,
    pub max_memory_per_sandbox: u32,
    pub max_disk_per_sandbox: u32,
    pub max_snapshot_size: u32,
    pub snapshot_quota: u32,
    pub volume_quota: u32,
}

impl Default for OrganizationQuota {
    fn default() -> Self {
        Self {
            total_cpu_quota: 10,
            total_memory_quota: 10,
            total_disk_quota: 30,
            max_cpu_per_sandbox: 4,
            max_memory_per_sandbox: 8,
            max_disk_per_sandbox: 10,
            max_snapshot_size: 20,
            snapshot_quota: 100,
            volume_quota: 100,
        }
    }
}

/// Partial quota change; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUpdate {
    pub total_cpu_quota: Option<u32>,
    pub total_memory_quota: Option<u32>,
    pub total_disk_quota: Option<u32>,
    pub max_cpu_per_sandbox: Option<u32>,
    pub max_memory_per_sandbox: Option<u32>,
    pub max_disk_per_sandbox: Option<u32>,
    pub max_snapshot_size: Option<u32>,
    pub snapshot_quota: Option<u32>,
    pub volume_quota: Option<u32>,
}

impl QuotaUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrites only the fields present in `self`.
    pub fn apply(&self, quota: &mut OrganizationQuota) {
        fn set(target: &mut u32, value: Option<u32>) {
            if let Some(value) = value {
                *target = value;
            }
        }
        set(&mut quota.total_cpu_quota, self.total_cpu_quota);
        set(&mut quota.total_memory_quota, self.total_memory_quota);
        set(&mut quota.total_disk_quota, self.total_disk_quota);
        set(&mut quota.max_cpu_per_sandbox, self.max_cpu_per_sandbox);
        set(&mut quota.max_memory_per_sandbox, self.max_memory_per_sandbox);
        set(&mut quota.max_disk_per_sandbox, self.max_disk_per_sandbox);
        set(&mut quota.max_snapshot_size, self.max_snapshot_size);
        set(&mut quota.snapshot_quota, self.snapshot_quota);
        set(&mut quota.volume_quota, self.volume_quota);
    }
}

/// Resources currently consumed by an organization's sandboxes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu: u32,
    pub memory: u32,
    pub disk: u32,
}

/// Resources requested for one new sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub cpu: u32,
    pub memory: u32,
    pub disk: u32,
}

impl SandboxRequest {
    pub fn new(cpu: u32, memory: u32, disk: u32) -> Self {
        Self { cpu, memory, disk }
    }
}

/// Quota totals next to current consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageOverview {
    pub total_cpu_quota: u32,
    pub total_gpu_quota: u32,
    pub total_memory_quota: u32,
    pub total_disk_quota: u32,
    pub current_cpu_usage: u32,
    pub current_memory_usage: u32,
    pub current_disk_usage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Creator's user id. Deliberately not a foreign key: the organization
    /// outlives its creator's user row.
    pub created_by: UserId,
    pub personal: bool,
    pub telemetry_enabled: bool,
    pub quota: OrganizationQuota,
    pub suspended: bool,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspension_reason: Option<String>,
    pub suspended_until: Option<DateTime<Utc>>,
    /// Loaded with the organization; empty for a freshly built value.
    pub members: Vec<OrganizationUser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// Builds an unsaved organization with default quota and telemetry on.
    pub fn new(name: impl Into<String>, created_by: impl Into<UserId>, personal: bool) -> Self {
        let now = now_utc();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_by: created_by.into(),
            personal,
            telemetry_enabled: true,
            quota: OrganizationQuota::default(),
            suspended: false,
            suspended_at: None,
            suspension_reason: None,
            suspended_until: None,
            members: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Effective suspension at the current instant.
    pub fn is_suspended(&self) -> bool {
        self.is_suspended_at(Utc::now())
    }

    /// Effective suspension at `now`; an elapsed `suspended_until` lifts it.
    pub fn is_suspended_at(&self, now: DateTime<Utc>) -> bool {
        if !self.suspended {
            return false;
        }
        !matches!(self.suspended_until, Some(until) if until <= now)
    }

    /// Marks the organization suspended as of `at`.
    pub fn apply_suspension(
        &mut self,
        reason: Option<String>,
        until: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) {
        self.suspended = true;
        self.suspension_reason = reason.filter(|reason| !reason.is_empty());
        self.suspended_until = until;
        self.suspended_at = Some(at);
    }

    pub fn clear_suspension(&mut self) {
        self.suspended = false;
        self.suspension_reason = None;
        self.suspended_until = None;
        self.suspended_at = None;
    }

    /// Current consumption. Sandboxes are not tracked here, so this is zero.
    pub fn quota_usage(&self) -> ResourceUsage {
        ResourceUsage::default()
    }

    pub fn can_create_sandbox(&self, request: SandboxRequest) -> bool {
        self.can_create_sandbox_with_usage(self.quota_usage(), request)
    }

    /// Admission check against externally supplied `usage`.
    pub fn can_create_sandbox_with_usage(
        &self,
        usage: ResourceUsage,
        request: SandboxRequest,
    ) -> bool {
        if self.is_suspended() {
            return false;
        }

        let quota = &self.quota;
        let within_total = |used: u32, requested: u32, total: u32| {
            u64::from(used) + u64::from(requested) <= u64::from(total)
        };

        within_total(usage.cpu, request.cpu, quota.total_cpu_quota)
            && within_total(usage.memory, request.memory, quota.total_memory_quota)
            && within_total(usage.disk, request.disk, quota.total_disk_quota)
            && request.cpu <= quota.max_cpu_per_sandbox
            && request.memory <= quota.max_memory_per_sandbox
            && request.disk <= quota.max_disk_per_sandbox
    }

    pub fn usage_overview(&self) -> UsageOverview {
        let usage = self.quota_usage();
        UsageOverview {
            total_cpu_quota: self.quota.total_cpu_quota,
            total_gpu_quota: 0,
            total_memory_quota: self.quota.total_memory_quota,
            total_disk_quota: self.quota.total_disk_quota,
            current_cpu_usage: usage.cpu,
            current_memory_usage: usage.memory,
            current_disk_usage: usage.disk,
        }
    }

    pub fn member(&self, user_id: &str) -> Option<&OrganizationUser> {
        self.members.iter().find(|member| member.user_id == user_id)
    }

    pub fn owner(&self) -> Option<&OrganizationUser> {
        self.members.iter().find(|member| member.is_owner())
    }
}
