//! End-to-end migration runs against SQLite

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tidemark::{
    DatabaseValue, DirectorySource, DownTarget, Ledger, MigrateError, MigrationBackend,
    MigrationConfig, MigrationExecutor, MigrationStatus, MigrationStep, MigrationUnit, Migrator,
    RunOutcome, Schema, SqliteBackend, StepError,
};

struct AddColumn {
    table: &'static str,
    column: &'static str,
}

#[async_trait]
impl MigrationStep for AddColumn {
    async fn run(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        let mut builder = schema.builder();
        builder.add_column(self.table, self.column, "TEXT");
        schema.apply(&builder).await
    }
}

struct DropColumn {
    table: &'static str,
    column: &'static str,
}

#[async_trait]
impl MigrationStep for DropColumn {
    async fn run(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        let mut builder = schema.builder();
        builder.drop_column(self.table, self.column);
        schema.apply(&builder).await
    }
}

struct AddIndex {
    table: &'static str,
    column: &'static str,
}

#[async_trait]
impl MigrationStep for AddIndex {
    async fn run(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        let mut builder = schema.builder();
        builder.create_index(self.table, &[self.column], None);
        schema.apply(&builder).await
    }
}

struct DropIndex(&'static str);

#[async_trait]
impl MigrationStep for DropIndex {
    async fn run(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        let mut builder = schema.builder();
        builder.drop_index(self.0);
        schema.apply(&builder).await
    }
}

struct Broken;

#[async_trait]
impl MigrationStep for Broken {
    async fn run(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        schema.execute("CREATE INDEX idx_users_email ON users (email)").await?;
        Err("index build rejected".into())
    }
}

async fn sqlite_backend() -> Arc<dyn MigrationBackend> {
    let backend: Arc<dyn MigrationBackend> = Arc::new(SqliteBackend::in_memory().await.unwrap());
    backend
        .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)", &[])
        .await
        .unwrap();
    backend
}

fn migrator(backend: &Arc<dyn MigrationBackend>, units: Vec<MigrationUnit>) -> Migrator {
    Migrator::new(Arc::new(units), backend.clone(), &MigrationConfig::default()).unwrap()
}

fn add_col() -> MigrationUnit {
    MigrationUnit::reversible(
        "1-add-col",
        "add nickname",
        AddColumn { table: "users", column: "nickname" },
        DropColumn { table: "users", column: "nickname" },
    )
    .unwrap()
}

fn add_index() -> MigrationUnit {
    MigrationUnit::reversible(
        "2-add-index",
        "index email",
        AddIndex { table: "users", column: "email" },
        DropIndex("idx_users_email"),
    )
    .unwrap()
}

async fn count(backend: &Arc<dyn MigrationBackend>, sql: &str, name: &str) -> i64 {
    backend
        .fetch_i64(sql, &[DatabaseValue::from(name)])
        .await
        .unwrap()
        .unwrap_or(0)
}

async fn has_column(backend: &Arc<dyn MigrationBackend>, column: &str) -> bool {
    count(
        backend,
        "SELECT COUNT(*) FROM pragma_table_info('users') WHERE name = ?",
        column,
    )
    .await
        > 0
}

async fn has_index(backend: &Arc<dyn MigrationBackend>, index: &str) -> bool {
    count(
        backend,
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?",
        index,
    )
    .await
        > 0
}

async fn has_table(backend: &Arc<dyn MigrationBackend>, table: &str) -> bool {
    count(
        backend,
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        table,
    )
    .await
        > 0
}

#[tokio::test]
async fn test_up_applies_in_one_batch_and_steps_back_one() {
    let backend = sqlite_backend().await;
    let migrator = migrator(&backend, vec![add_index(), add_col()]);

    let report = migrator.up(None).await.unwrap();
    assert_eq!(report.outcome(), RunOutcome::Completed { count: 2 });
    let applied: Vec<&str> = report.completed.iter().map(|id| id.as_str()).collect();
    assert_eq!(applied, vec!["1-add-col", "2-add-index"]);

    let entries = migrator.ledger().list_entries().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|entry| entry.batch == 1));

    let report = migrator.down(&DownTarget::Steps(1)).await.unwrap();
    let reverted: Vec<&str> = report.completed.iter().map(|id| id.as_str()).collect();
    assert_eq!(reverted, vec!["2-add-index"]);

    assert!(!has_index(&backend, "idx_users_email").await);
    assert!(has_column(&backend, "nickname").await);
    let applied = migrator.ledger().list_applied().await.unwrap();
    assert_eq!(applied.len(), 1);
    assert!(applied.contains("1-add-col"));
}

#[tokio::test]
async fn test_failed_unit_halts_and_stays_pending() {
    let backend = sqlite_backend().await;
    let broken = MigrationUnit::reversible("2-add-index", "index email", Broken, DropIndex("idx_users_email")).unwrap();
    let migrator = migrator(&backend, vec![add_col(), broken]);

    let report = migrator.up(None).await.unwrap();
    assert!(!report.is_success());
    match report.outcome() {
        RunOutcome::Halted { completed, planned, failed_at } => {
            assert_eq!(completed, 1);
            assert_eq!(planned, 2);
            assert_eq!(failed_at.as_str(), "2-add-index");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let failure = report.failure.as_ref().unwrap();
    assert!(matches!(failure.error, MigrateError::Operation { ref message, .. } if message.contains("index build rejected")));

    // The half-built index went away with the failed unit's transaction
    assert!(!has_index(&backend, "idx_users_email").await);
    assert!(has_column(&backend, "nickname").await);

    let status = migrator.status().await.unwrap();
    let pending: Vec<&str> = status.pending().map(|entry| entry.id.as_str()).collect();
    assert_eq!(pending, vec!["2-add-index"]);
    let applied: Vec<&str> = status.applied().map(|entry| entry.id.as_str()).collect();
    assert_eq!(applied, vec!["1-add-col"]);
}

#[tokio::test]
async fn test_down_by_batch_ignores_other_batches() {
    let backend = sqlite_backend().await;
    let units: Vec<MigrationUnit> = ["a", "b", "c", "d"]
        .iter()
        .enumerate()
        .map(|(i, table)| {
            MigrationUnit::sql(
                &format!("{}-{}", i + 1, table),
                table,
                &format!("CREATE TABLE {} (id INTEGER)", table),
                &format!("DROP TABLE {}", table),
            )
            .unwrap()
        })
        .collect();
    let migrator = migrator(&backend, units);

    migrator.up(Some(1)).await.unwrap();
    migrator.up(Some(1)).await.unwrap();
    let report = migrator.up(None).await.unwrap();
    assert_eq!(report.batch, Some(3));

    let report = migrator.down(&DownTarget::Batch(3)).await.unwrap();
    let reverted: Vec<&str> = report.completed.iter().map(|id| id.as_str()).collect();
    assert_eq!(reverted, vec!["4-d", "3-c"]);

    assert!(has_table(&backend, "a").await);
    assert!(has_table(&backend, "b").await);
    assert!(!has_table(&backend, "c").await);

    let entries = migrator.ledger().list_entries().await.unwrap();
    let batches: Vec<i64> = entries.iter().map(|entry| entry.batch).collect();
    assert_eq!(batches, vec![1, 2]);
}

#[tokio::test]
async fn test_round_trip_returns_ledger_to_empty() {
    let backend = sqlite_backend().await;
    let tables = ["accounts", "orders", "invoices", "payments", "refunds"];
    let units: Vec<MigrationUnit> = tables
        .iter()
        .enumerate()
        .map(|(i, table)| {
            MigrationUnit::sql(
                &format!("{:03}_{}", i, table),
                table,
                &format!("CREATE TABLE {} (id INTEGER PRIMARY KEY, note TEXT)", table),
                &format!("DROP TABLE {}", table),
            )
            .unwrap()
        })
        .collect();
    let migrator = migrator(&backend, units);

    assert_eq!(migrator.up(None).await.unwrap().completed.len(), tables.len());
    let report = migrator.down(&DownTarget::All).await.unwrap();
    assert_eq!(report.completed.len(), tables.len());
    assert_eq!(report.completed.first().unwrap().as_str(), "004_refunds");

    assert!(migrator.ledger().list_entries().await.unwrap().is_empty());
    for table in tables {
        assert!(!has_table(&backend, table).await);
    }
    assert!(has_table(&backend, "tidemark_migrations").await);
}

#[tokio::test]
async fn test_second_up_reports_nothing_to_do() {
    let backend = sqlite_backend().await;
    let migrator = migrator(&backend, vec![add_col(), add_index()]);

    migrator.up(None).await.unwrap();
    let report = migrator.up(None).await.unwrap();
    assert_eq!(report.outcome(), RunOutcome::NothingToDo);
    assert_eq!(migrator.status().await.unwrap().pending().count(), 0);
}

#[tokio::test]
async fn test_out_of_order_unit_is_still_applied() {
    let backend = sqlite_backend().await;
    let first = MigrationUnit::sql("1", "a", "CREATE TABLE a (id INTEGER)", "DROP TABLE a").unwrap();
    let late = MigrationUnit::sql("2", "b", "CREATE TABLE b (id INTEGER)", "DROP TABLE b").unwrap();
    let third = MigrationUnit::sql("3", "c", "CREATE TABLE c (id INTEGER)", "DROP TABLE c").unwrap();

    migrator(&backend, vec![first.clone(), third.clone()]).up(None).await.unwrap();

    let migrator = migrator(&backend, vec![first, late, third]);
    let report = migrator.up(None).await.unwrap();
    let applied: Vec<&str> = report.completed.iter().map(|id| id.as_str()).collect();
    assert_eq!(applied, vec!["2"]);
    assert_eq!(report.batch, Some(2));
}

#[tokio::test]
async fn test_concurrent_apply_of_same_unit_loses_on_ledger() {
    let backend = sqlite_backend().await;
    let unit = MigrationUnit::sql("1", "create t", "CREATE TABLE t (id INTEGER)", "DROP TABLE t").unwrap();
    let winner = migrator(&backend, vec![unit.clone()]);

    // A second engine that planned the same unit before the winner recorded it
    let loser = MigrationExecutor::new(backend.clone(), Ledger::new(backend.clone(), "tidemark_migrations").unwrap());

    winner.up(None).await.unwrap();
    let report = loser.apply_pending(&[unit], 2).await;
    let failure = report.failure.expect("second apply must fail");
    assert!(matches!(
        failure.error,
        MigrateError::LedgerWrite { ref message, .. } if message.contains("already recorded")
    ));
    assert!(has_table(&backend, "t").await);

    let entries = winner.ledger().list_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].batch, 1);
}

#[tokio::test]
async fn test_directory_source_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let migrations_dir = temp_dir.path().join("migrations");
    fs::create_dir_all(&migrations_dir).unwrap();

    fs::write(
        migrations_dir.join("20240101_000000_create_users.sql"),
        "-- Up migration\nCREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);\n\n-- Down migration\nDROP TABLE users;\n",
    )
    .unwrap();
    fs::write(
        migrations_dir.join("20240102_000000_create_posts.sql"),
        "-- Up migration\nCREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER);\nCREATE INDEX idx_posts_user ON posts (user_id);\n\n-- Down migration\nDROP INDEX idx_posts_user;\nDROP TABLE posts;\n",
    )
    .unwrap();

    let config = MigrationConfig {
        database_url: Some(format!("sqlite://{}", temp_dir.path().join("app.db").display())),
        migrations_dir: migrations_dir.clone(),
        ..MigrationConfig::default()
    };
    let migrator = Migrator::from_config(&config).await.unwrap();

    let report = migrator.up(None).await.unwrap();
    assert_eq!(report.outcome(), RunOutcome::Completed { count: 2 });

    let status = migrator.status().await.unwrap();
    assert_eq!(status.entries[0].name, "create users");
    assert!(matches!(status.entries[1].status, MigrationStatus::Applied { batch: 1, .. }));

    // A definition removed after being applied can no longer be reverted
    fs::remove_file(migrations_dir.join("20240102_000000_create_posts.sql")).unwrap();
    let err = migrator.down(&DownTarget::All).await.unwrap_err();
    assert!(err.is_preflight());
    assert!(matches!(err, MigrateError::UnknownMigration { ref id, .. } if id == "20240102_000000_create_posts"));
    assert_eq!(migrator.ledger().list_entries().await.unwrap().len(), 2);

    let status = migrator.status().await.unwrap();
    assert_eq!(status.orphaned.len(), 1);
    assert_eq!(status.entries.len(), 1);

    migrator.close().await;
}

#[tokio::test]
async fn test_duplicate_ids_fail_before_any_change() {
    let backend = sqlite_backend().await;
    let migrator = migrator(&backend, vec![add_col(), add_col()]);

    let err = migrator.up(None).await.unwrap_err();
    assert!(matches!(err, MigrateError::DuplicateId { .. }));
    assert!(!has_column(&backend, "nickname").await);
    assert!(!has_table(&backend, "tidemark_migrations").await);
}

fn directory_migrator(backend: &Arc<dyn MigrationBackend>, dir: &std::path::Path) -> Migrator {
    Migrator::new(
        Arc::new(DirectorySource::new(dir)),
        backend.clone(),
        &MigrationConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_trigger_migration_runs_as_written() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("20240101_000000_audited.sql"),
        "-- Up migration\n\
         CREATE TABLE audited (id INTEGER PRIMARY KEY, updated TEXT);\n\
         CREATE TRIGGER audited_touch AFTER INSERT ON audited BEGIN\n\
             UPDATE audited SET updated = 'x' WHERE id = NEW.id;\n\
         END;\n\
         \n\
         -- Down migration\n\
         DROP TRIGGER audited_touch;\n\
         DROP TABLE audited;\n",
    )
    .unwrap();

    let backend = sqlite_backend().await;
    let migrator = directory_migrator(&backend, temp_dir.path());

    let report = migrator.up(None).await.unwrap();
    assert_eq!(report.outcome(), RunOutcome::Completed { count: 1 });
    assert_eq!(
        count(
            &backend,
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name = ?",
            "audited_touch",
        )
        .await,
        1
    );

    backend
        .execute("INSERT INTO audited (id) VALUES (7)", &[])
        .await
        .unwrap();
    assert_eq!(count(&backend, "SELECT COUNT(*) FROM audited WHERE updated = ?", "x").await, 1);

    let report = migrator.down(&DownTarget::All).await.unwrap();
    assert_eq!(report.outcome(), RunOutcome::Completed { count: 1 });
    assert!(!has_table(&backend, "audited").await);
}

#[tokio::test]
async fn test_comments_with_section_words_do_not_move_sql() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("20240101_000000_profiles.sql"),
        "-- Up migration\n\
         -- downgrade safe: nothing else reads profiles yet\n\
         CREATE TABLE profiles (id INTEGER PRIMARY KEY);\n\
         \n\
         -- Down migration\n\
         -- update callers before reverting\n\
         DROP TABLE profiles;\n",
    )
    .unwrap();

    let backend = sqlite_backend().await;
    let migrator = directory_migrator(&backend, temp_dir.path());

    migrator.up(None).await.unwrap();
    assert!(has_table(&backend, "profiles").await);
    assert!(migrator.status().await.unwrap().entries[0].reversible);

    migrator.down(&DownTarget::All).await.unwrap();
    assert!(!has_table(&backend, "profiles").await);
    assert!(migrator.ledger().list_entries().await.unwrap().is_empty());
}
