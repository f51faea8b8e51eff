//! Environment-driven configuration.
//!
//! # Responsibility
//! - Describe where the store lives and how logging is set up.
//! - Parse `ORGSTORE_*` variables with typed errors instead of silent
//!   fallbacks.
//!
//! # Invariants
//! - Unset variables fall back to documented defaults.
//! - Set-but-invalid variables are rejected.

use crate::logging::default_log_level;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const ENV_DB_PATH: &str = "ORGSTORE_DB_PATH";
pub const ENV_DB_BUSY_TIMEOUT_MS: &str = "ORGSTORE_DB_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "ORGSTORE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "ORGSTORE_LOG_DIR";
pub const ENV_LOG_STDERR: &str = "ORGSTORE_LOG_STDERR";

const DEFAULT_DB_FILE_NAME: &str = "orgstore.sqlite3";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const MEMORY_MARKER: &str = ":memory:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub location: DatabaseLocation,
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            location: DatabaseLocation::File(PathBuf::from(DEFAULT_DB_FILE_NAME)),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// One of `trace|debug|info|warn|error`, case-insensitive.
    pub level: String,
    /// Absolute directory for rolling log files.
    pub log_dir: PathBuf,
    /// Also write log lines to stderr.
    pub duplicate_to_stderr: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    /// `None` when no log directory is configured.
    pub logging: Option<LoggingConfig>,
}

impl AppConfig {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let location = match non_empty(lookup(ENV_DB_PATH)) {
            None => DatabaseLocation::File(PathBuf::from(DEFAULT_DB_FILE_NAME)),
            Some(value) if value == MEMORY_MARKER => DatabaseLocation::Memory,
            Some(value) => DatabaseLocation::File(PathBuf::from(value)),
        };

        let busy_timeout_ms = match non_empty(lookup(ENV_DB_BUSY_TIMEOUT_MS)) {
            None => DEFAULT_BUSY_TIMEOUT_MS,
            Some(value) => value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: ENV_DB_BUSY_TIMEOUT_MS,
                value,
                reason: "expected milliseconds as an unsigned integer",
            })?,
        };

        let logging = match non_empty(lookup(ENV_LOG_DIR)) {
            None => None,
            Some(log_dir) => Some(LoggingConfig {
                level: non_empty(lookup(ENV_LOG_LEVEL))
                    .unwrap_or_else(|| default_log_level().to_string()),
                log_dir: PathBuf::from(log_dir),
                duplicate_to_stderr: match non_empty(lookup(ENV_LOG_STDERR)) {
                    None => false,
                    Some(value) => parse_bool(ENV_LOG_STDERR, value)?,
                },
            }),
        };

        Ok(Self {
            database: DatabaseConfig {
                location,
                busy_timeout: Duration::from_millis(busy_timeout_ms),
            },
            logging,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected true|false",
        }),
    }
}
