//! Migration Planner - decides which units to apply or revert
//!
//! Planning is pure: it looks at the discovered units and the ledger rows and
//! never touches the store.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::definitions::{LedgerEntry, MigrationId, MigrationUnit};
use crate::error::{MigrateError, MigrateResult};

/// What a `down` invocation should revert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownTarget {
    /// The N most recent units (by descending id)
    Steps(usize),
    /// Every applied unit
    All,
    /// Every unit of the highest batch
    LastBatch,
    /// Every unit recorded under this batch
    Batch(i64),
    /// Every applied unit whose id sorts after this one
    To(MigrationId),
}

impl Default for DownTarget {
    fn default() -> Self {
        DownTarget::Steps(1)
    }
}

impl fmt::Display for DownTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownTarget::Steps(n) => write!(f, "{} step(s)", n),
            DownTarget::All => f.write_str("all"),
            DownTarget::LastBatch => f.write_str("last batch"),
            DownTarget::Batch(b) => write!(f, "batch {}", b),
            DownTarget::To(id) => write!(f, "to {}", id),
        }
    }
}

/// Units not yet applied, in ascending id order, optionally capped at `limit`
///
/// Gaps are honoured: a unit whose id sorts before already-applied units is still
/// pending.
pub fn plan_up(
    all_units: &[MigrationUnit],
    applied: &HashSet<String>,
    limit: Option<usize>,
) -> Vec<MigrationUnit> {
    let mut pending: Vec<MigrationUnit> = all_units
        .iter()
        .filter(|unit| !applied.contains(unit.id().as_str()))
        .cloned()
        .collect();
    pending.sort_by(|a, b| a.id().cmp(b.id()));

    if let Some(limit) = limit {
        pending.truncate(limit);
    }
    pending
}

/// Applied units to revert, in descending id order
///
/// Fails when a ledger row has no matching unit, since its down operation is gone.
pub fn plan_down(
    all_units: &[MigrationUnit],
    entries: &[LedgerEntry],
    target: &DownTarget,
) -> MigrateResult<Vec<MigrationUnit>> {
    let by_id: HashMap<&str, &MigrationUnit> = all_units
        .iter()
        .map(|unit| (unit.id().as_str(), unit))
        .collect();

    let mut orphans: Vec<&str> = entries
        .iter()
        .map(|entry| entry.migration_id.as_str())
        .filter(|id| !by_id.contains_key(id))
        .collect();
    orphans.sort_unstable();
    if let Some(orphan) = orphans.first() {
        return Err(MigrateError::UnknownMigration {
            id: orphan.to_string(),
            reason: "applied but its definition no longer exists, so it cannot be reverted"
                .to_string(),
        });
    }

    let mut applied: Vec<(&MigrationUnit, i64)> = entries
        .iter()
        .filter_map(|entry| by_id.get(entry.migration_id.as_str()).map(|unit| (*unit, entry.batch)))
        .collect();
    applied.sort_by(|a, b| b.0.id().cmp(a.0.id()));

    let selected: Vec<&MigrationUnit> = match target {
        DownTarget::Steps(n) => applied.iter().take(*n).map(|(unit, _)| *unit).collect(),
        DownTarget::All => applied.iter().map(|(unit, _)| *unit).collect(),
        DownTarget::LastBatch => match entries.iter().map(|entry| entry.batch).max() {
            Some(latest) => select_batch(&applied, latest),
            None => Vec::new(),
        },
        DownTarget::Batch(batch) => select_batch(&applied, *batch),
        DownTarget::To(target_id) => {
            if !by_id.contains_key(target_id.as_str()) {
                return Err(MigrateError::UnknownMigration {
                    id: target_id.to_string(),
                    reason: "no migration with this id exists".to_string(),
                });
            }
            applied
                .iter()
                .filter(|(unit, _)| unit.id() > target_id)
                .map(|(unit, _)| *unit)
                .collect()
        }
    };

    Ok(selected.into_iter().cloned().collect())
}

fn select_batch<'a>(applied: &[(&'a MigrationUnit, i64)], batch: i64) -> Vec<&'a MigrationUnit> {
    applied
        .iter()
        .filter(|(_, b)| *b == batch)
        .map(|(unit, _)| *unit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn units(ids: &[&str]) -> Vec<MigrationUnit> {
        ids.iter()
            .map(|id| MigrationUnit::sql(id, id, "SELECT 1", "SELECT 1").unwrap())
            .collect()
    }

    fn entry(id: &str, batch: i64) -> LedgerEntry {
        LedgerEntry {
            migration_id: id.to_string(),
            batch,
            applied_at: Utc::now(),
        }
    }

    fn ids(plan: &[MigrationUnit]) -> Vec<&str> {
        plan.iter().map(|u| u.id().as_str()).collect()
    }

    fn applied(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_up_skips_applied_and_sorts() {
        let all = units(&["3", "1", "2"]);
        let plan = plan_up(&all, &applied(&["2"]), None);
        assert_eq!(ids(&plan), vec!["1", "3"]);
    }

    #[test]
    fn test_plan_up_limit() {
        let all = units(&["1", "2", "3"]);
        assert_eq!(ids(&plan_up(&all, &applied(&[]), Some(2))), vec!["1", "2"]);
        assert!(plan_up(&all, &applied(&[]), Some(0)).is_empty());
    }

    #[test]
    fn test_plan_up_includes_out_of_order_unit() {
        let all = units(&["1-add-col", "2-add-index", "3-add-table"]);
        let plan = plan_up(&all, &applied(&["1-add-col", "3-add-table"]), None);
        assert_eq!(ids(&plan), vec!["2-add-index"]);
    }

    #[test]
    fn test_plan_down_steps_is_lifo() {
        let all = units(&["1", "2", "3"]);
        let entries = vec![entry("1", 1), entry("2", 1), entry("3", 2)];

        let plan = plan_down(&all, &entries, &DownTarget::Steps(2)).unwrap();
        assert_eq!(ids(&plan), vec!["3", "2"]);

        let plan = plan_down(&all, &entries, &DownTarget::All).unwrap();
        assert_eq!(ids(&plan), vec!["3", "2", "1"]);
    }

    #[test]
    fn test_plan_down_never_includes_unapplied() {
        let all = units(&["1", "2", "3"]);
        let entries = vec![entry("1", 1)];
        let plan = plan_down(&all, &entries, &DownTarget::All).unwrap();
        assert_eq!(ids(&plan), vec!["1"]);
    }

    #[test]
    fn test_plan_down_batch_ignores_steps() {
        let all = units(&["1", "2", "3", "4"]);
        let entries = vec![entry("1", 1), entry("2", 2), entry("3", 3), entry("4", 3)];

        let plan = plan_down(&all, &entries, &DownTarget::Batch(3)).unwrap();
        assert_eq!(ids(&plan), vec!["4", "3"]);

        let plan = plan_down(&all, &entries, &DownTarget::LastBatch).unwrap();
        assert_eq!(ids(&plan), vec!["4", "3"]);

        let plan = plan_down(&all, &entries, &DownTarget::Batch(9)).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_down_to_target() {
        let all = units(&["1", "2", "3"]);
        let entries = vec![entry("1", 1), entry("2", 1), entry("3", 1)];

        let plan = plan_down(&all, &entries, &DownTarget::To(MigrationId::new("1").unwrap())).unwrap();
        assert_eq!(ids(&plan), vec!["3", "2"]);

        let err = plan_down(&all, &entries, &DownTarget::To(MigrationId::new("9").unwrap())).unwrap_err();
        assert!(matches!(err, MigrateError::UnknownMigration { .. }));
    }

    #[test]
    fn test_plan_down_reports_deleted_definition() {
        let all = units(&["1"]);
        let entries = vec![entry("1", 1), entry("2", 1)];

        let err = plan_down(&all, &entries, &DownTarget::Steps(1)).unwrap_err();
        match err {
            MigrateError::UnknownMigration { id, .. } => assert_eq!(id, "2"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plan_down_on_empty_ledger() {
        let all = units(&["1"]);
        assert!(plan_down(&all, &[], &DownTarget::LastBatch).unwrap().is_empty());
        assert!(plan_down(&all, &[], &DownTarget::default()).unwrap().is_empty());
    }
}
