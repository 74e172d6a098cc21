//! Migrator - the engine facade used by the CLI and by embedding applications
//!
//! Ties discovery, the ledger, planning and execution together. Pre-flight
//! problems come back as `Err` before the store is changed; failures while
//! running units come back inside the report.

use std::sync::Arc;

use tracing::{debug, info};

use super::definitions::{
    ApplyReport, MigrationDirection, MigrationStatus, RevertReport, RunReport, StatusEntry,
    StatusReport,
};
use super::executor::MigrationExecutor;
use super::ledger::Ledger;
use super::planner::{plan_down, plan_up, DownTarget};
use super::registry::{ensure_reversible, MigrationRegistry, Requirement};
use super::source::{DirectorySource, MigrationSource};
use crate::backends::{self, MigrationBackend};
use crate::config::MigrationConfig;
use crate::error::MigrateResult;

/// Applies, reverts and reports on migrations for one data store
pub struct Migrator {
    registry: MigrationRegistry,
    backend: Arc<dyn MigrationBackend>,
    executor: MigrationExecutor,
}

impl Migrator {
    /// Create a migrator over an already connected backend
    pub fn new(
        source: Arc<dyn MigrationSource>,
        backend: Arc<dyn MigrationBackend>,
        config: &MigrationConfig,
    ) -> MigrateResult<Self> {
        config.validate()?;
        let ledger = Ledger::new(backend.clone(), config.migrations_table.clone())?;
        let executor = MigrationExecutor::new(backend.clone(), ledger)
            .with_unit_timeout(config.unit_timeout);

        Ok(Self {
            registry: MigrationRegistry::new(source),
            backend,
            executor,
        })
    }

    /// Connect using the configured URL and load units from the migrations directory
    pub async fn from_config(config: &MigrationConfig) -> MigrateResult<Self> {
        config.validate()?;
        let url = config.require_database_url()?;
        let backend = backends::connect(url, &config.pool).await?;
        let source = Arc::new(DirectorySource::new(config.migrations_dir.clone()));
        Self::new(source, backend, config)
    }

    pub fn ledger(&self) -> &Ledger {
        self.executor.ledger()
    }

    pub fn backend(&self) -> &Arc<dyn MigrationBackend> {
        &self.backend
    }

    /// Apply pending units in ascending id order, at most `limit` of them
    ///
    /// Every unit applied by one call shares a new batch number.
    pub async fn up(&self, limit: Option<usize>) -> MigrateResult<ApplyReport> {
        let discovered = self.registry.discover(Requirement::Forward)?;
        let ledger = self.ledger();
        ledger.ensure_initialized().await?;

        let applied = ledger.list_applied().await?;
        let plan = plan_up(discovered.units(), &applied, limit);
        if plan.is_empty() {
            info!("Nothing to migrate; {} migration(s) already applied", applied.len());
            return Ok(RunReport::empty(MigrationDirection::Up));
        }

        let batch = ledger.next_batch_number().await?;
        debug!("Planned {} migration(s) for batch {}", plan.len(), batch);
        let report = self.executor.apply_pending(&plan, batch).await;

        if report.is_success() {
            info!(
                "Applied {} migration(s) in batch {} ({}ms)",
                report.completed.len(),
                batch,
                report.execution_time_ms
            );
        }
        Ok(report)
    }

    /// Revert applied units selected by `target`, newest first
    pub async fn down(&self, target: &DownTarget) -> MigrateResult<RevertReport> {
        let discovered = self.registry.discover(Requirement::Forward)?;
        let ledger = self.ledger();
        ledger.ensure_initialized().await?;

        let entries = ledger.list_entries().await?;
        let plan = plan_down(discovered.units(), &entries, target)?;
        ensure_reversible(&plan)?;

        if plan.is_empty() {
            info!("Nothing to roll back for {}", target);
            return Ok(RunReport::empty(MigrationDirection::Down));
        }

        debug!("Planned {} rollback(s) for {}", plan.len(), target);
        let report = self.executor.revert_planned(&plan).await;

        if report.is_success() {
            info!(
                "Rolled back {} migration(s) ({}ms)",
                report.completed.len(),
                report.execution_time_ms
            );
        }
        Ok(report)
    }

    /// Applied and pending units plus ledger rows with no matching unit
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let discovered = self.registry.discover(Requirement::Forward)?;
        let ledger = self.ledger();
        ledger.ensure_initialized().await?;
        let entries = ledger.list_entries().await?;

        let entries_by_id: std::collections::HashMap<&str, _> = entries
            .iter()
            .map(|entry| (entry.migration_id.as_str(), entry))
            .collect();

        let status_entries = discovered
            .iter()
            .map(|unit| {
                let status = match entries_by_id.get(unit.id().as_str()) {
                    Some(entry) => MigrationStatus::Applied {
                        applied_at: entry.applied_at,
                        batch: entry.batch,
                    },
                    None => MigrationStatus::Pending,
                };
                StatusEntry {
                    id: unit.id().clone(),
                    name: unit.name().to_string(),
                    reversible: unit.is_reversible(),
                    status,
                }
            })
            .collect();

        let orphaned = entries
            .iter()
            .filter(|entry| !discovered.contains(&entry.migration_id))
            .cloned()
            .collect();

        Ok(StatusReport {
            entries: status_entries,
            orphaned,
        })
    }

    /// Fail with the first error that would stop `down` from running
    pub async fn check_revertible(&self, target: &DownTarget) -> MigrateResult<()> {
        let discovered = self.registry.discover(Requirement::Forward)?;
        let ledger = self.ledger();
        ledger.ensure_initialized().await?;
        let plan = plan_down(discovered.units(), &ledger.list_entries().await?, target)?;
        ensure_reversible(&plan)
    }

    /// Close the backend's connection pool
    pub async fn close(&self) {
        self.backend.close().await;
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("source", &self.registry.source().describe())
            .field("dialect", &self.backend.dialect())
            .field("table", &self.ledger().table())
            .finish()
    }
}
