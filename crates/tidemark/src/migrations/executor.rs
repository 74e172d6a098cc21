//! Migration Executor - runs a plan against the data store
//!
//! Units run strictly one after another. Each unit gets its own transaction that
//! covers both its schema change and its ledger row, so a unit is either fully
//! applied (or reverted) or untouched. The first failure halts the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::definitions::{
    ApplyReport, MigrationDirection, MigrationUnit, Reversal, RevertReport, RunReport, RunState,
    UnitFailure,
};
use super::ledger::Ledger;
use super::step::{MigrationStep, Schema};
use crate::backends::{BackendTransaction, MigrationBackend};
use crate::error::{MigrateError, MigrateResult};

/// Executes planned units one at a time
#[derive(Clone)]
pub struct MigrationExecutor {
    backend: Arc<dyn MigrationBackend>,
    ledger: Ledger,
    unit_timeout: Option<Duration>,
}

impl MigrationExecutor {
    pub fn new(backend: Arc<dyn MigrationBackend>, ledger: Ledger) -> Self {
        Self {
            backend,
            ledger,
            unit_timeout: None,
        }
    }

    /// Bound each unit's transaction; an expired unit is treated as failed
    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Apply the plan in order, recording each unit under `batch`
    pub async fn apply_pending(&self, plan: &[MigrationUnit], batch: i64) -> ApplyReport {
        self.run(MigrationDirection::Up, plan, Some(batch)).await
    }

    /// Revert the plan in order (callers pass it in descending id order)
    pub async fn revert_planned(&self, plan: &[MigrationUnit]) -> RevertReport {
        self.run(MigrationDirection::Down, plan, None).await
    }

    async fn run(
        &self,
        direction: MigrationDirection,
        plan: &[MigrationUnit],
        batch: Option<i64>,
    ) -> RunReport {
        let start_time = Instant::now();
        let mut report = RunReport {
            direction,
            batch,
            planned: plan.len(),
            completed: Vec::new(),
            failure: None,
            state: RunState::Idle,
            execution_time_ms: 0,
        };

        for (index, unit) in plan.iter().enumerate() {
            transition(&mut report.state, RunState::Executing(index));
            match direction {
                MigrationDirection::Up => info!("Applying migration: {} - {}", unit.id(), unit.name()),
                MigrationDirection::Down => {
                    info!("Rolling back migration: {} - {}", unit.id(), unit.name())
                }
            }

            match self.run_unit(direction, unit, batch.unwrap_or_default()).await {
                Ok(()) => {
                    transition(&mut report.state, RunState::Committed(index));
                    report.completed.push(unit.id().clone());
                }
                Err(err) => {
                    error!(
                        "Migration {} failed ({}); halting after {} of {} unit(s): {}",
                        unit.id(),
                        direction,
                        report.completed.len(),
                        plan.len(),
                        err
                    );
                    transition(&mut report.state, RunState::Failed(index));
                    report.failure = Some(UnitFailure {
                        id: unit.id().clone(),
                        name: unit.name().to_string(),
                        error: err,
                    });
                    break;
                }
            }
        }

        if report.failure.is_none() {
            transition(&mut report.state, RunState::Done);
        }
        report.execution_time_ms = start_time.elapsed().as_millis();
        report
    }

    /// Run one unit inside its own transaction
    async fn run_unit(
        &self,
        direction: MigrationDirection,
        unit: &MigrationUnit,
        batch: i64,
    ) -> MigrateResult<()> {
        let step = match direction {
            MigrationDirection::Up => unit.up().clone(),
            MigrationDirection::Down => match unit.down() {
                Reversal::Reversible(step) => step.clone(),
                Reversal::Irreversible => {
                    return Err(MigrateError::MalformedUnit {
                        id: unit.id().clone(),
                        reason: "migration is irreversible and cannot be reverted".to_string(),
                    })
                }
            },
        };

        let mut tx = self.backend.begin().await.map_err(|e| {
            MigrateError::Transaction(format!(
                "Failed to start transaction for {}: {}",
                unit.id(),
                e
            ))
        })?;

        let work = self.run_in_transaction(tx.as_mut(), direction, unit, step.as_ref(), batch);
        let outcome = match self.unit_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => Err(MigrateError::Timeout {
                    id: unit.id().clone(),
                    after: limit,
                }),
            },
            None => work.await,
        };

        match outcome {
            Ok(()) => tx.commit().await.map_err(|e| {
                MigrateError::Transaction(format!("Failed to commit {}: {}", unit.id(), e))
            }),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        "Rollback of {} reported an error; the store discards the open transaction anyway: {}",
                        unit.id(),
                        rollback_err
                    );
                } else {
                    warn!("Rolled back transaction for {}", unit.id());
                }
                Err(err)
            }
        }
    }

    async fn run_in_transaction(
        &self,
        tx: &mut dyn BackendTransaction,
        direction: MigrationDirection,
        unit: &MigrationUnit,
        step: &dyn MigrationStep,
        batch: i64,
    ) -> MigrateResult<()> {
        // Claim the ledger row first so a concurrent run of the same unit fails
        // on the ledger before touching the schema
        match direction {
            MigrationDirection::Up => self.ledger.record_applied(tx, unit.id(), batch).await?,
            MigrationDirection::Down => self.ledger.record_reverted(tx, unit.id()).await?,
        }

        let mut schema = Schema::new(tx);
        step.run(&mut schema)
            .await
            .map_err(|e| MigrateError::Operation {
                id: unit.id().clone(),
                message: e.to_string(),
            })
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!("Migration run state {:?} -> {:?}", state, next);
    *state = next;
}
