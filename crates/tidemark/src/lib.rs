//! # tidemark: versioned schema migrations
//!
//! Applies and reverts ordered, individually reversible schema changes against
//! PostgreSQL or SQLite. Each change runs in its own transaction together with
//! its ledger row, and every `up` invocation records its changes under a new
//! batch number so they can be reverted as a group.
//!
//! ```no_run
//! use tidemark::{MigrationConfig, Migrator};
//!
//! # async fn run() -> tidemark::MigrateResult<()> {
//! let config = MigrationConfig::from_env()?;
//! let migrator = Migrator::from_config(&config).await?;
//! let report = migrator.up(None).await?;
//! println!("{:?}", report.outcome());
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod migrations;

pub use backends::{
    connect, BackendError, BackendTransaction, DatabaseBackendType, DatabaseValue, MigrationBackend,
    PoolConfig, PostgresBackend, SqlDialect, SqliteBackend,
};
pub use config::{ConfigError, MigrationConfig};
pub use error::{MigrateError, MigrateResult, StepError};
pub use migrations::*;
