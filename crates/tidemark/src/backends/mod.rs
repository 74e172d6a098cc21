//! Database Backend Abstractions
//!
//! This module provides the data store side of the engine: the backend traits,
//! the PostgreSQL and SQLite implementations, and URL based selection.

pub mod core;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use self::core::*;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect the backend from a database URL scheme
    pub fn from_url(url: &str) -> Result<Self, BackendError> {
        let scheme = url
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| BackendError::connection(format!("Database URL '{}' has no scheme", url)))?;

        scheme
            .parse()
            .map_err(|e: String| BackendError::connection(e))
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Seconds to wait for a free connection
    pub acquire_timeout: u64,
    pub idle_timeout: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: 30,
            idle_timeout: Some(600), // 10 minutes
        }
    }
}

/// Connect to the store named by `database_url`
pub async fn connect(
    database_url: &str,
    config: &PoolConfig,
) -> Result<Arc<dyn MigrationBackend>, BackendError> {
    let backend_type = DatabaseBackendType::from_url(database_url)?;
    tracing::debug!("Connecting {} migration backend", backend_type);

    match backend_type {
        DatabaseBackendType::PostgreSQL => {
            Ok(Arc::new(PostgresBackend::connect(database_url, config).await?))
        }
        DatabaseBackendType::SQLite => Ok(Arc::new(SqliteBackend::connect(database_url, config).await?)),
    }
}
