//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration system including
//! MigrationUnit, LedgerEntry, run reports and status records.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::{MigrationStep, SqlStep};
use crate::error::{MigrateError, MigrateResult};

/// Ordering key of a migration unit
///
/// Ids compare lexicographically, so timestamp prefixes must be zero-padded
/// (`20240101_120000_add_users`, `0001_init`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationId(String);

impl MigrationId {
    /// Create an id, rejecting empty ids and ids containing whitespace
    pub fn new(id: impl Into<String>) -> MigrateResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(MigrateError::Source("Migration id must not be empty".to_string()));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(MigrateError::Source(format!(
                "Migration id '{}' must not contain whitespace",
                id
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MigrationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Backward half of a migration unit
#[derive(Clone)]
pub enum Reversal {
    /// The unit can be reverted by running this step
    Reversible(Arc<dyn MigrationStep>),
    /// The unit is one-way; reverting it is refused before execution
    Irreversible,
}

impl Reversal {
    pub fn is_reversible(&self) -> bool {
        matches!(self, Reversal::Reversible(_))
    }
}

impl fmt::Debug for Reversal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reversal::Reversible(step) => write!(f, "Reversible({})", step.describe()),
            Reversal::Irreversible => f.write_str("Irreversible"),
        }
    }
}

/// A single versioned schema change
#[derive(Clone)]
pub struct MigrationUnit {
    id: MigrationId,
    name: String,
    up: Arc<dyn MigrationStep>,
    down: Reversal,
}

impl MigrationUnit {
    pub fn new(
        id: MigrationId,
        name: impl Into<String>,
        up: Arc<dyn MigrationStep>,
        down: Reversal,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            up,
            down,
        }
    }

    /// Code-defined unit with both directions
    pub fn reversible<U, D>(id: &str, name: &str, up: U, down: D) -> MigrateResult<Self>
    where
        U: MigrationStep + 'static,
        D: MigrationStep + 'static,
    {
        Ok(Self::new(
            MigrationId::new(id)?,
            name,
            Arc::new(up),
            Reversal::Reversible(Arc::new(down)),
        ))
    }

    /// Code-defined one-way unit
    pub fn irreversible<U>(id: &str, name: &str, up: U) -> MigrateResult<Self>
    where
        U: MigrationStep + 'static,
    {
        Ok(Self::new(
            MigrationId::new(id)?,
            name,
            Arc::new(up),
            Reversal::Irreversible,
        ))
    }

    /// Unit backed by SQL scripts; an empty down script makes it irreversible
    pub fn sql(id: &str, name: &str, up_sql: &str, down_sql: &str) -> MigrateResult<Self> {
        let down = if down_sql.trim().is_empty() {
            Reversal::Irreversible
        } else {
            Reversal::Reversible(Arc::new(SqlStep::new(down_sql)))
        };

        Ok(Self::new(
            MigrationId::new(id)?,
            name,
            Arc::new(SqlStep::new(up_sql)),
            down,
        ))
    }

    pub fn id(&self) -> &MigrationId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn up(&self) -> &Arc<dyn MigrationStep> {
        &self.up
    }

    pub fn down(&self) -> &Reversal {
        &self.down
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_reversible()
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("up", &self.up.describe())
            .field("down", &self.down)
            .finish()
    }
}

/// A row of the applied-state ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Id of the applied unit, held by value
    pub migration_id: String,
    /// Invocation that applied the unit
    pub batch: i64,
    /// When the unit was applied
    pub applied_at: DateTime<Utc>,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration (run `up`)
    Up,
    /// Revert the migration (run `down`)
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => f.write_str("up"),
            MigrationDirection::Down => f.write_str("down"),
        }
    }
}

/// Per-run state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Planning,
    /// Running the unit at this plan index
    Executing(usize),
    /// The unit at this plan index committed
    Committed(usize),
    Done,
    /// The unit at this plan index failed; terminal for the invocation
    Failed(usize),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed(_))
    }
}

/// The unit that halted a run
#[derive(Debug, Clone)]
pub struct UnitFailure {
    pub id: MigrationId,
    pub name: String,
    pub error: MigrateError,
}

/// Result of applying or reverting a plan
#[derive(Debug, Clone)]
pub struct RunReport {
    pub direction: MigrationDirection,
    /// Batch the applied units were recorded under (apply runs only)
    pub batch: Option<i64>,
    /// Number of units in the plan
    pub planned: usize,
    /// Units applied or reverted, in execution order
    pub completed: Vec<MigrationId>,
    pub failure: Option<UnitFailure>,
    pub state: RunState,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Report of an `up` run
pub type ApplyReport = RunReport;

/// Report of a `down` run
pub type RevertReport = RunReport;

/// Coarse classification of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    NothingToDo,
    Completed { count: usize },
    Halted {
        completed: usize,
        planned: usize,
        failed_at: MigrationId,
    },
}

impl RunReport {
    /// Report for a run whose plan was empty
    pub fn empty(direction: MigrationDirection) -> Self {
        Self {
            direction,
            batch: None,
            planned: 0,
            completed: Vec::new(),
            failure: None,
            state: RunState::Done,
            execution_time_ms: 0,
        }
    }

    pub fn outcome(&self) -> RunOutcome {
        match &self.failure {
            Some(failure) => RunOutcome::Halted {
                completed: self.completed.len(),
                planned: self.planned,
                failed_at: failure.id.clone(),
            },
            None if self.planned == 0 => RunOutcome::NothingToDo,
            None => RunOutcome::Completed {
                count: self.completed.len(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        /// When it was applied
        applied_at: DateTime<Utc>,
        /// Batch number
        batch: i64,
    },
}

/// Status line for one known unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub id: MigrationId,
    pub name: String,
    pub reversible: bool,
    pub status: MigrationStatus,
}

/// Applied vs pending overview
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// Every known unit in ascending id order
    pub entries: Vec<StatusEntry>,
    /// Ledger rows whose unit no longer exists
    pub orphaned: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn pending(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == MigrationStatus::Pending)
    }

    pub fn applied(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, MigrationStatus::Applied { .. }))
    }
}
