//! User domain model.
//!
//! # Invariants
//! - `id` is caller-supplied and non-empty.
//! - Public key names are unique within one user.

use super::now_utc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Caller-supplied user identifier (e.g. an identity-provider subject).
pub type UserId = String;

/// System-wide role, independent of organization membership roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    #[default]
    User,
    Admin,
}

impl SystemRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Named public key registered by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPublicKey {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeyPair {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "privateKey")]
    pub private_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserValidationError {
    #[error("user id must not be empty")]
    EmptyId,
    #[error("duplicate public key name `{0}`")]
    DuplicatePublicKeyName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub key_pair: Option<UserKeyPair>,
    pub public_keys: Vec<UserPublicKey>,
    pub role: SystemRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Creates a user with no email, no keys and the `user` role.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        let now = now_utc();
        Self {
            id: id.into(),
            name: name.into(),
            email: String::new(),
            email_verified: false,
            key_pair: None,
            public_keys: Vec::new(),
            role: SystemRole::User,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = email.into();
        self.email_verified = verified;
        self
    }

    pub fn with_role(mut self, role: SystemRole) -> Self {
        self.role = role;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == SystemRole::Admin
    }

    pub fn has_verified_email(&self) -> bool {
        self.email_verified
    }

    /// Adds `key` under `name`, replacing an existing entry with that name.
    pub fn add_public_key(&mut self, name: impl Into<String>, key: impl Into<String>) {
        let name = name.into();
        self.public_keys.retain(|existing| existing.name != name);
        self.public_keys.push(UserPublicKey {
            name,
            key: key.into(),
        });
    }

    /// Returns `false` when no key with `name` exists.
    pub fn remove_public_key(&mut self, name: &str) -> bool {
        let before = self.public_keys.len();
        self.public_keys.retain(|existing| existing.name != name);
        self.public_keys.len() != before
    }

    pub fn public_key(&self, name: &str) -> Option<&UserPublicKey> {
        self.public_keys.iter().find(|existing| existing.name == name)
    }

    pub fn validate(&self) -> Result<(), UserValidationError> {
        if self.id.trim().is_empty() {
            return Err(UserValidationError::EmptyId);
        }
        let mut seen = HashSet::new();
        for key in &self.public_keys {
            if !seen.insert(key.name.as_str()) {
                return Err(UserValidationError::DuplicatePublicKeyName(key.name.clone()));
            }
        }
        Ok(())
    }
}
