//! Organization membership.

use super::organization::OrganizationId;
use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a user inside one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    #[default]
    Member,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Membership row keyed by `(organization_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationUser {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrganizationUser {
    pub fn new(organization_id: OrganizationId, user_id: impl Into<UserId>, role: MemberRole) -> Self {
        let now = super::now_utc();
        Self {
            organization_id,
            user_id: user_id.into(),
            role,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.role == MemberRole::Owner
    }

    pub fn is_admin(&self) -> bool {
        self.role == MemberRole::Admin
    }

    pub fn is_member(&self) -> bool {
        self.role == MemberRole::Member
    }

    /// Owners and admins.
    pub fn has_admin_access(&self) -> bool {
        matches!(self.role, MemberRole::Owner | MemberRole::Admin)
    }

    pub fn can_manage_users(&self) -> bool {
        self.has_admin_access()
    }

    /// Owners only.
    pub fn can_manage_settings(&self) -> bool {
        self.is_owner()
    }
}
