//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own business policy (limits, suspension, deletion rules) so
//!   repositories stay storage-only.

pub mod organization_service;
