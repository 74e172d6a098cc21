//! Applied-State Ledger - persistent record of applied migrations
//!
//! The ledger is a reserved table in the store being migrated. Presence of a row
//! means the unit is currently applied. Writes happen inside the unit's own
//! transaction so the schema change and its bookkeeping commit together.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use super::definitions::{LedgerEntry, MigrationId};
use crate::backends::{BackendError, BackendTransaction, DatabaseValue, MigrationBackend, SqlDialect};
use crate::config::validate_identifier;
use crate::error::{MigrateError, MigrateResult};

/// Default table name for tracking migrations
pub const DEFAULT_LEDGER_TABLE: &str = "tidemark_migrations";

/// Applied-state ledger backed by a table in the migrated store
#[derive(Clone)]
pub struct Ledger {
    backend: Arc<dyn MigrationBackend>,
    table: String,
}

impl Ledger {
    pub fn new(backend: Arc<dyn MigrationBackend>, table: impl Into<String>) -> MigrateResult<Self> {
        let table = table.into();
        validate_identifier("migrations_table", &table)?;
        Ok(Self { backend, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn dialect(&self) -> SqlDialect {
        self.backend.dialect()
    }

    /// Create the ledger table if missing
    ///
    /// A failed create is tolerated when the table exists afterwards, which is what
    /// happens when another engine instance won the race to create it.
    pub async fn ensure_initialized(&self) -> MigrateResult<()> {
        let create_sql = self.create_table_sql();
        match self.backend.execute(&create_sql, &[]).await {
            Ok(_) => Ok(()),
            Err(err) => {
                if self.table_exists().await? {
                    tracing::debug!(
                        "Ledger table {} created concurrently: {}",
                        self.table,
                        err
                    );
                    Ok(())
                } else {
                    Err(ledger_read_error("Failed to create migrations table", err))
                }
            }
        }
    }

    async fn table_exists(&self) -> MigrateResult<bool> {
        let count = self
            .backend
            .fetch_i64(&self.table_exists_sql(), &[DatabaseValue::from(self.catalog_name())])
            .await
            .map_err(|e| ledger_read_error("Failed to inspect migrations table", e))?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// All ledger rows, oldest batch first
    pub async fn list_entries(&self) -> MigrateResult<Vec<LedgerEntry>> {
        self.backend
            .fetch_entries(&self.list_entries_sql())
            .await
            .map_err(|e| ledger_read_error("Failed to query applied migrations", e))
    }

    /// Ids of all currently applied units
    pub async fn list_applied(&self) -> MigrateResult<HashSet<String>> {
        Ok(self
            .list_entries()
            .await?
            .into_iter()
            .map(|entry| entry.migration_id)
            .collect())
    }

    /// Highest batch number in the ledger, 0 when empty
    pub async fn latest_batch(&self) -> MigrateResult<i64> {
        let latest = self
            .backend
            .fetch_i64(&self.latest_batch_sql(), &[])
            .await
            .map_err(|e| ledger_read_error("Failed to get latest batch", e))?;
        Ok(latest.unwrap_or(0))
    }

    /// Batch number for the next invocation
    pub async fn next_batch_number(&self) -> MigrateResult<i64> {
        Ok(self.latest_batch().await? + 1)
    }

    /// Record a unit as applied within the given transaction
    pub async fn record_applied(
        &self,
        tx: &mut dyn BackendTransaction,
        migration_id: &MigrationId,
        batch: i64,
    ) -> MigrateResult<()> {
        let params = [
            DatabaseValue::from(migration_id.as_str()),
            DatabaseValue::Int64(batch),
            DatabaseValue::Timestamp(Utc::now()),
        ];

        tx.execute(&self.record_applied_sql(), &params)
            .await
            .map_err(|e| {
                let message = if e.is_unique_violation() {
                    format!("migration is already recorded as applied ({})", e)
                } else {
                    e.to_string()
                };
                MigrateError::LedgerWrite {
                    id: migration_id.to_string(),
                    message,
                }
            })?;

        Ok(())
    }

    /// Remove a unit's ledger row within the given transaction; absent rows are a no-op
    pub async fn record_reverted(
        &self,
        tx: &mut dyn BackendTransaction,
        migration_id: &MigrationId,
    ) -> MigrateResult<()> {
        let removed = tx
            .execute(
                &self.record_reverted_sql(),
                &[DatabaseValue::from(migration_id.as_str())],
            )
            .await
            .map_err(|e| MigrateError::LedgerWrite {
                id: migration_id.to_string(),
                message: e.to_string(),
            })?;

        if removed == 0 {
            tracing::debug!("No ledger row to remove for {}", migration_id);
        }
        Ok(())
    }

    /// SQL to create the migrations tracking table
    pub fn create_table_sql(&self) -> String {
        let dialect = self.dialect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                migration_id VARCHAR(255) NOT NULL PRIMARY KEY,\n    \
                batch {} NOT NULL,\n    \
                applied_at {} NOT NULL\n\
            )",
            self.table,
            dialect.bigint_type(),
            dialect.timestamp_type()
        )
    }

    /// Table name as the catalog stores it; PostgreSQL folds unquoted names to lowercase
    fn catalog_name(&self) -> String {
        match self.dialect() {
            SqlDialect::PostgreSQL => self.table.to_lowercase(),
            SqlDialect::SQLite => self.table.clone(),
        }
    }

    fn table_exists_sql(&self) -> String {
        match self.dialect() {
            SqlDialect::PostgreSQL => "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1"
                .to_string(),
            SqlDialect::SQLite => {
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?".to_string()
            }
        }
    }

    fn list_entries_sql(&self) -> String {
        format!(
            "SELECT migration_id, batch, applied_at FROM {} ORDER BY batch ASC, migration_id ASC",
            self.table
        )
    }

    fn latest_batch_sql(&self) -> String {
        format!("SELECT MAX(batch) FROM {}", self.table)
    }

    fn record_applied_sql(&self) -> String {
        let dialect = self.dialect();
        format!(
            "INSERT INTO {} (migration_id, batch, applied_at) VALUES ({}, {}, {})",
            self.table,
            dialect.parameter_placeholder(0),
            dialect.parameter_placeholder(1),
            dialect.parameter_placeholder(2)
        )
    }

    fn record_reverted_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE migration_id = {}",
            self.table,
            self.dialect().parameter_placeholder(0)
        )
    }
}

fn ledger_read_error(context: &str, err: BackendError) -> MigrateError {
    match MigrateError::from(err.clone()) {
        MigrateError::Connection(message) => MigrateError::Connection(message),
        _ => MigrateError::LedgerRead(format!("{}: {}", context, err)),
    }
}
