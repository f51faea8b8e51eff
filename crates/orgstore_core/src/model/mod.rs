//! Domain model for users, organizations and memberships.
//!
//! # Responsibility
//! - Define the records persisted by the repositories.
//! - Expose invariant predicates (suspension, sandbox admission, member
//!   roles) as pure functions of entity state.
//!
//! # Invariants
//! - Timestamps carry millisecond precision, matching storage.
//! - Derived facts (role capabilities, effective suspension) are computed,
//!   never stored.

use chrono::{DateTime, Utc};

pub mod organization;
pub mod organization_user;
pub mod user;

/// Current time truncated to whole milliseconds.
pub fn now_utc() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
