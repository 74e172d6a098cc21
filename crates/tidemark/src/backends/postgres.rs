//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL implementation of the backend traits
//! using sqlx as the underlying database driver.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::core::*;
use super::PoolConfig;
use crate::migrations::definitions::LedgerEntry;

/// PostgreSQL migration backend
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pool for the given database URL
    pub async fn connect(database_url: &str, config: &PoolConfig) -> BackendResult<Self> {
        if !database_url.starts_with("postgresql://") && !database_url.starts_with("postgres://") {
            return Err(BackendError::connection("Invalid PostgreSQL URL scheme"));
        }

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout));

        if let Some(idle_timeout) = config.idle_timeout {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        let pool = options.connect(database_url).await.map_err(|e| {
            BackendError::connection(format!("Failed to create PostgreSQL pool: {}", e))
        })?;

        Ok(Self::new(pool))
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q DatabaseValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Int64(v) => query.bind(*v),
        DatabaseValue::Text(s) => query.bind(s.as_str()),
        DatabaseValue::Timestamp(ts) => query.bind(*ts),
    }
}

fn build_query<'q>(sql: &'q str, params: &'q [DatabaseValue]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| bind_value(query, param))
}

#[async_trait]
impl MigrationBackend for PostgresBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
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

        Ok(Box::new(PostgresTransaction { inner }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    inner: Transaction<'static, Postgres>,
}

#[async_trait]
impl BackendTransaction for PostgresTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
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
