//! Core Database Backend Traits
//!
//! This module defines the traits the engine uses to talk to a data store.
//! A backend hands out transactions; every migration unit runs inside exactly one
//! of them together with its ledger bookkeeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::migrations::definitions::LedgerEntry;

/// Result type alias for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Connection pool level access to a data store
#[async_trait]
pub trait MigrationBackend: Send + Sync {
    /// SQL dialect spoken by this backend
    fn dialect(&self) -> SqlDialect;

    /// Execute a statement outside of any unit transaction
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> BackendResult<u64>;

    /// Fetch ledger rows; the query must select `migration_id`, `batch` and `applied_at`
    async fn fetch_entries(&self, sql: &str) -> BackendResult<Vec<LedgerEntry>>;

    /// Fetch the first column of the first row as an integer
    async fn fetch_i64(&self, sql: &str, params: &[DatabaseValue]) -> BackendResult<Option<i64>>;

    /// Begin a transaction
    async fn begin(&self) -> BackendResult<Box<dyn BackendTransaction>>;

    /// Close the pool
    async fn close(&self);
}

/// An open transaction; dropping it without commit rolls it back
#[async_trait]
pub trait BackendTransaction: Send {
    fn dialect(&self) -> SqlDialect;

    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> BackendResult<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> BackendResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> BackendResult<()>;
}

/// Parameter values bound into ledger statements
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Int64(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::Text(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::Timestamp(value)
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Column type used for the ledger's `applied_at` column
    pub fn timestamp_type(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "TIMESTAMPTZ",
            SqlDialect::SQLite => "TEXT",
        }
    }

    /// Column type used for the ledger's `batch` column
    pub fn bigint_type(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "BIGINT",
            SqlDialect::SQLite => "INTEGER",
        }
    }

    /// Column definition for an auto-increment primary key
    pub fn auto_increment_primary_key(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "SERIAL PRIMARY KEY",
            SqlDialect::SQLite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }
}

/// Coarse classification of a store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The store could not be reached or the pool is gone
    Connection,
    /// An insert hit a uniqueness constraint
    UniqueViolation,
    /// Any other statement failure
    Query,
    /// Begin, commit or rollback failed
    Transaction,
}

/// Error raised by a backend call
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Connection, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Query, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Transaction, message)
    }

    pub fn is_unique_violation(&self) -> bool {
        self.kind == BackendErrorKind::UniqueViolation
    }

    /// Classify a sqlx error
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                BackendErrorKind::UniqueViolation
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => BackendErrorKind::Connection,
            _ => BackendErrorKind::Query,
        };
        Self::new(kind, err.to_string())
    }

    /// Classify a sqlx error raised while beginning or finishing a transaction
    pub(crate) fn from_sqlx_transaction(err: sqlx::Error, action: &str) -> Self {
        let classified = Self::from_sqlx(err);
        match classified.kind {
            BackendErrorKind::Connection => classified,
            _ => Self::transaction(format!("Failed to {} transaction: {}", action, classified.message)),
        }
    }
}
