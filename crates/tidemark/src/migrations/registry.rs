//! Migration Registry - discovery and validation of migration units
//!
//! Every failure here is raised before the data store is touched.

use std::collections::HashMap;
use std::sync::Arc;

use super::definitions::{MigrationId, MigrationUnit};
use super::source::MigrationSource;
use crate::error::{MigrateError, MigrateResult};

/// What the caller is about to do with the discovered units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Only forward operations will run
    Forward,
    /// Every unit must also be revertible
    Reversible,
}

/// Discovers units from a source and returns them in canonical order
#[derive(Clone)]
pub struct MigrationRegistry {
    source: Arc<dyn MigrationSource>,
}

impl MigrationRegistry {
    pub fn new(source: Arc<dyn MigrationSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn MigrationSource> {
        &self.source
    }

    /// Load, validate and sort all units; each call re-reads the source
    pub fn discover(&self, requirement: Requirement) -> MigrateResult<DiscoveredMigrations> {
        let mut units = self.source.load()?;
        units.sort_by(|a, b| a.id().cmp(b.id()));

        if let Some(pair) = units.windows(2).find(|pair| pair[0].id() == pair[1].id()) {
            return Err(MigrateError::DuplicateId {
                id: pair[0].id().clone(),
            });
        }

        for unit in &units {
            if unit.up().is_noop() {
                return Err(MigrateError::MalformedUnit {
                    id: unit.id().clone(),
                    reason: "migration has no up operation".to_string(),
                });
            }
        }

        if requirement == Requirement::Reversible {
            ensure_reversible(&units)?;
        }

        tracing::debug!(
            "Discovered {} migration(s) from {}",
            units.len(),
            self.source.describe()
        );

        Ok(DiscoveredMigrations::new(units))
    }
}

/// Fail with `MalformedUnit` on the first unit that has no down operation
pub fn ensure_reversible(units: &[MigrationUnit]) -> MigrateResult<()> {
    match units.iter().find(|unit| !unit.is_reversible()) {
        Some(unit) => Err(MigrateError::MalformedUnit {
            id: unit.id().clone(),
            reason: "migration is irreversible and cannot be reverted".to_string(),
        }),
        None => Ok(()),
    }
}

/// Validated units in ascending id order
#[derive(Debug, Clone, Default)]
pub struct DiscoveredMigrations {
    units: Vec<MigrationUnit>,
    index: HashMap<MigrationId, usize>,
}

impl DiscoveredMigrations {
    fn new(units: Vec<MigrationUnit>) -> Self {
        let index = units
            .iter()
            .enumerate()
            .map(|(i, unit)| (unit.id().clone(), i))
            .collect();
        Self { units, index }
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MigrationUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&MigrationUnit> {
        let id = MigrationId::new(id).ok()?;
        self.index.get(&id).map(|&i| &self.units[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

impl<'a> IntoIterator for &'a DiscoveredMigrations {
    type Item = &'a MigrationUnit;
    type IntoIter = std::slice::Iter<'a, MigrationUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.iter()
    }
}
