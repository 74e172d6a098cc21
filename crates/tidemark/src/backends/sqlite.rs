//! SQLite Backend Implementation
//!
//! File-backed and in-memory SQLite stores through sqlx. The in-memory mode pins
//! the pool to a single long-lived connection, since every SQLite in-memory
//! connection is a separate database.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::core::*;
use super::PoolConfig;
use crate::migrations::definitions::LedgerEntry;

/// SQLite migration backend
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Wrap an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at the given `sqlite:` URL
    pub async fn connect(database_url: &str, config: &PoolConfig) -> BackendResult<Self> {
        if !database_url.starts_with("sqlite:") {
            return Err(BackendError::connection("Invalid SQLite URL scheme"));
        }
        if database_url.contains(":memory:") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| BackendError::connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .connect_with(options)
            .await
            .map_err(|e| BackendError::connection(format!("Failed to open SQLite database: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Private in-memory database
    pub async fn in_memory() -> BackendResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| BackendError::connection(format!("Invalid SQLite URL: {}", e)))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| {
                BackendError::connection(format!("Failed to open in-memory SQLite database: {}", e))
            })?;

        Ok(Self::new(pool))
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q DatabaseValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        DatabaseValue::Int64(v) => query.bind(*v),
        DatabaseValue::Text(s) => query.bind(s.as_str()),
        DatabaseValue::Timestamp(ts) => query.bind(*ts),
    }
}

fn build_query<'q>(
    sql: &'q str,
    params: &'q [DatabaseValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_value(query, param))
}

#[async_trait]
impl MigrationBackend for SqliteBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> BackendResult<u64> {
        // Without parameters the script goes out unprepared and may hold several statements
        let result = if params.is_empty() {
            sqlx::Executor::execute(&self.pool, sql).await
        } else {
            build_query(sql, params).execute(&self.pool).await
        }
        .map_err(BackendError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    async fn fetch_entries(&self, sql: &str) -> BackendResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(BackendError::from_sqlx)?;

        rows.iter()
            .map(|row| {
                Ok(LedgerEntry {
                    migration_id: row.try_get("migration_id").map_err(BackendError::from_sqlx)?,
                    batch: row.try_get("batch").map_err(BackendError::from_sqlx)?,
                    applied_at: row
                        .try_get::<DateTime<Utc>, _>("applied_at")
                        .map_err(BackendError::from_sqlx)?,
                })
            })
            .collect()
    }

    async fn fetch_i64(&self, sql: &str, params: &[DatabaseValue]) -> BackendResult<Option<i64>> {
        let row = build_query(sql, params)
            .fetch_optional(&self.pool)
            .await
            .map_err(BackendError::from_sqlx)?;

        match row {
            Some(row) => row.try_get::<Option<i64>, _>(0).map_err(BackendError::from_sqlx),
            None => Ok(None),
        }
    }

    async fn begin(&self) -> BackendResult<Box<dyn BackendTransaction>> {
        let inner = self
            .pool
            .begin()
            .await
            .map_err(|e| BackendError::from_sqlx_transaction(e, "start"))?;

        Ok(Box::new(SqliteTransaction { inner }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    inner: Transaction<'static, Sqlite>,
}

#[async_trait]
impl BackendTransaction for SqliteTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> BackendResult<u64> {
        let result = if params.is_empty() {
            sqlx::Executor::execute(&mut *self.inner, sql).await
        } else {
            build_query(sql, params).execute(&mut *self.inner).await
        }
        .map_err(BackendError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> BackendResult<()> {
        self.inner
            .commit()
            .await
            .map_err(|e| BackendError::from_sqlx_transaction(e, "commit"))
    }

    async fn rollback(self: Box<Self>) -> BackendResult<()> {
        self.inner
            .rollback()
            .await
            .map_err(|e| BackendError::from_sqlx_transaction(e, "roll back"))
    }
}
