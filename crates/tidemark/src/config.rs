//! Engine configuration
//!
//! Loaded from environment variables and validated before any connection is made.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::backends::PoolConfig;
use crate::migrations::ledger::DEFAULT_LEDGER_TABLE;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"));

/// Configuration error type
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Check that a name can be spliced into SQL as a bare identifier
pub fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if IDENTIFIER_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::invalid_value(
            field,
            value,
            "a SQL identifier of letters, digits and underscores",
        ))
    }
}

/// Configuration for the migration engine
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub database_url: Option<String>,
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking migrations
    pub migrations_table: String,
    /// Per-unit transaction timeout
    pub unit_timeout: Option<Duration>,
    pub pool: PoolConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: DEFAULT_LEDGER_TABLE.to_string(),
            unit_timeout: None,
            pool: PoolConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.database_url = env::var("TIDEMARK_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok();

        if let Ok(dir) = env::var("TIDEMARK_MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }

        if let Ok(table) = env::var("TIDEMARK_MIGRATIONS_TABLE") {
            config.migrations_table = table;
        }

        if let Ok(timeout_str) = env::var("TIDEMARK_UNIT_TIMEOUT_SECS") {
            let secs: u64 = timeout_str.parse().map_err(|_| {
                ConfigError::invalid_value(
                    "unit_timeout",
                    &timeout_str,
                    "a whole number of seconds",
                )
            })?;
            config.unit_timeout = Some(Duration::from_secs(secs));
        }

        if let Ok(max_str) = env::var("TIDEMARK_MAX_CONNECTIONS") {
            config.pool.max_connections = max_str.parse().map_err(|_| {
                ConfigError::invalid_value("max_connections", &max_str, "a positive integer")
            })?;
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("migrations_table", &self.migrations_table)?;

        if let Some(timeout) = self.unit_timeout {
            if timeout.is_zero() {
                return Err(ConfigError::invalid_value(
                    "unit_timeout",
                    "0",
                    "a timeout of at least one second",
                ));
            }
        }

        if self.pool.max_connections == 0 {
            return Err(ConfigError::invalid_value(
                "max_connections",
                "0",
                "a positive integer",
            ));
        }

        Ok(())
    }

    /// The database URL, or an error explaining how to provide one
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or_else(|| {
            ConfigError::missing_required(
                "database_url",
                "Set TIDEMARK_DATABASE_URL or DATABASE_URL, or pass --database-url",
            )
        })
    }
}
