//! Error types for the migration engine
//!
//! Errors fall in two groups. Pre-flight errors (registry and planner) are raised
//! before any unit touches the data store, so fixing the input and re-running is
//! always safe. Execution errors are raised mid-run and are carried inside the run
//! report together with the id of the unit that failed.

use std::time::Duration;

use thiserror::Error;

use crate::backends::BackendError;
use crate::config::ConfigError;
use crate::migrations::definitions::MigrationId;

/// Result type alias for engine operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error type returned by a unit's forward or backward operation
pub type StepError = Box<dyn std::error::Error + Send + Sync>;

/// Error taxonomy of the migration engine
#[derive(Debug, Clone, Error)]
pub enum MigrateError {
    /// Two discovered units share an id
    #[error("Duplicate migration id '{id}'")]
    DuplicateId { id: MigrationId },

    /// A unit cannot serve the requested operation
    #[error("Malformed migration '{id}': {reason}")]
    MalformedUnit { id: MigrationId, reason: String },

    /// The ledger references a unit that no longer exists, or a target id is unknown
    #[error("Unknown migration '{id}': {reason}")]
    UnknownMigration { id: String, reason: String },

    /// The ledger rejected a write (duplicate id or store failure)
    #[error("Ledger write failed for '{id}': {message}")]
    LedgerWrite { id: String, message: String },

    /// The ledger could not be read or created
    #[error("Ledger read failed: {0}")]
    LedgerRead(String),

    /// A unit's `up` or `down` operation failed
    #[error("Migration '{id}' failed: {message}")]
    Operation { id: MigrationId, message: String },

    /// A unit's operation did not finish within the per-unit timeout
    #[error("Migration '{id}' timed out after {}s", .after.as_secs())]
    Timeout { id: MigrationId, after: Duration },

    /// Migration definitions could not be read or parsed
    #[error("Migration source error: {0}")]
    Source(String),

    /// The data store could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// A unit's transaction could not be opened, committed or rolled back
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Invalid engine configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl MigrateError {
    /// True when the error was raised before any data store mutation could happen
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            MigrateError::DuplicateId { .. }
                | MigrateError::MalformedUnit { .. }
                | MigrateError::UnknownMigration { .. }
                | MigrateError::Source(_)
                | MigrateError::Config(_)
        )
    }

    /// Id of the unit the error is attributed to, if any
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            MigrateError::DuplicateId { id }
            | MigrateError::MalformedUnit { id, .. }
            | MigrateError::Operation { id, .. }
            | MigrateError::Timeout { id, .. } => Some(id.as_str()),
            MigrateError::UnknownMigration { id, .. } | MigrateError::LedgerWrite { id, .. } => {
                Some(id.as_str())
            }
            _ => None,
        }
    }
}

impl From<BackendError> for MigrateError {
    fn from(err: BackendError) -> Self {
        use crate::backends::BackendErrorKind;

        match err.kind {
            BackendErrorKind::Connection => MigrateError::Connection(err.message),
            BackendErrorKind::Transaction => MigrateError::Transaction(err.message),
            BackendErrorKind::UniqueViolation | BackendErrorKind::Query => {
                MigrateError::LedgerRead(err.message)
            }
        }
    }
}
