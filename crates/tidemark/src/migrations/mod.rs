//! Migration System
//!
//! Discovery, planning and execution of versioned schema changes, with an
//! applied-state ledger kept in the migrated store.

pub mod definitions;
pub mod executor;
pub mod ledger;
pub mod migrator;
pub mod planner;
pub mod registry;
pub mod schema_builder;
pub mod source;
pub mod step;

pub use definitions::*;
pub use executor::MigrationExecutor;
pub use ledger::{Ledger, DEFAULT_LEDGER_TABLE};
pub use migrator::Migrator;
pub use planner::{plan_down, plan_up, DownTarget};
pub use registry::{ensure_reversible, DiscoveredMigrations, MigrationRegistry, Requirement};
pub use schema_builder::{SchemaBuilder, TableBuilder};
pub use source::{create_migration, DirectorySource, MigrationSource};
pub use step::{split_sql_statements, MigrationStep, Schema, SqlStep};
