use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use tidemark::{
    create_migration, DownTarget, MigrationDirection, MigrationStatus, Migrator, RunOutcome,
    RunReport, StatusReport,
};

use super::CommandOutcome;

pub async fn create(dir: &Path, name: &str) -> Result<CommandOutcome> {
    let path = create_migration(dir, name)
        .with_context(|| format!("Failed to create migration '{}'", name))?;

    println!("Created migration: {}", path.display());
    Ok(CommandOutcome::Success)
}

pub async fn up(migrator: &Migrator, limit: Option<usize>) -> Result<CommandOutcome> {
    let report = migrator.up(limit).await.context("Migration aborted before any change")?;
    print!("{}", render_report(&report));
    Ok(outcome_of(&report))
}

pub async fn down(migrator: &Migrator, target: &DownTarget) -> Result<CommandOutcome> {
    let report = migrator
        .down(target)
        .await
        .with_context(|| format!("Rollback ({}) aborted before any change", target))?;
    print!("{}", render_report(&report));
    Ok(outcome_of(&report))
}

pub async fn status(migrator: &Migrator, json: bool) -> Result<CommandOutcome> {
    let status = migrator.status().await.context("Failed to read migration status")?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?;
        println!("{}", rendered);
    } else {
        print!("{}", render_status(&status));
    }
    Ok(CommandOutcome::Success)
}

fn outcome_of(report: &RunReport) -> CommandOutcome {
    match report.outcome() {
        RunOutcome::NothingToDo => CommandOutcome::NothingToDo,
        RunOutcome::Completed { .. } => CommandOutcome::Success,
        RunOutcome::Halted { .. } => CommandOutcome::Halted,
    }
}

/// Human readable summary of an `up` or `down` run
pub fn render_report(report: &RunReport) -> String {
    let (verb, nothing) = match report.direction {
        MigrationDirection::Up => ("Applied", "Nothing to migrate."),
        MigrationDirection::Down => ("Rolled back", "Nothing to roll back."),
    };

    let mut out = String::new();
    match report.outcome() {
        RunOutcome::NothingToDo => {
            let _ = writeln!(out, "{}", nothing);
        }
        RunOutcome::Completed { count } => {
            match report.batch {
                Some(batch) => {
                    let _ = writeln!(out, "{} {} migration(s) in batch {}:", verb, count, batch);
                }
                None => {
                    let _ = writeln!(out, "{} {} migration(s):", verb, count);
                }
            }
            for id in &report.completed {
                let _ = writeln!(out, "  {}", id);
            }
            let _ = writeln!(out, "Done in {}ms.", report.execution_time_ms);
        }
        RunOutcome::Halted {
            completed,
            planned,
            failed_at,
        } => {
            for id in &report.completed {
                let _ = writeln!(out, "  {} {}", verb.to_lowercase(), id);
            }
            let _ = writeln!(
                out,
                "FAILED: completed {} of {} migration(s), failed at {}",
                completed, planned, failed_at
            );
            if let Some(failure) = &report.failure {
                let _ = writeln!(out, "  {} ({}): {}", failure.id, failure.name, failure.error);
            }
        }
    }
    out
}

/// Table of applied and pending migrations
pub fn render_status(status: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Migration Status:");

    if status.entries.is_empty() {
        let _ = writeln!(out, "  No migrations found");
    }

    for entry in &status.entries {
        let reversible = if entry.reversible { "" } else { " [irreversible]" };
        match &entry.status {
            MigrationStatus::Applied { applied_at, batch } => {
                let _ = writeln!(
                    out,
                    "  [applied] {} - {} (batch {}, {}){}",
                    entry.id,
                    entry.name,
                    batch,
                    applied_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    reversible
                );
            }
            MigrationStatus::Pending => {
                let _ = writeln!(out, "  [pending] {} - {}{}", entry.id, entry.name, reversible);
            }
        }
    }

    if !status.orphaned.is_empty() {
        let _ = writeln!(out, "Applied but missing from the migrations source:");
        for entry in &status.orphaned {
            let _ = writeln!(out, "  {} (batch {})", entry.migration_id, entry.batch);
        }
    }

    let _ = writeln!(
        out,
        "Applied: {}, Pending: {}",
        status.applied().count(),
        status.pending().count()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tidemark::{
        LedgerEntry, MigrateError, MigrationId, RunState, StatusEntry, UnitFailure,
    };

    fn id(s: &str) -> MigrationId {
        MigrationId::new(s).unwrap()
    }

    #[test]
    fn test_render_nothing_to_do() {
        let out = render_report(&RunReport::empty(MigrationDirection::Up));
        assert_eq!(out, "Nothing to migrate.\n");
        assert_eq!(outcome_of(&RunReport::empty(MigrationDirection::Down)), CommandOutcome::NothingToDo);
    }

    #[test]
    fn test_render_halted_run() {
        let report = RunReport {
            direction: MigrationDirection::Up,
            batch: Some(3),
            planned: 2,
            completed: vec![id("1-add-col")],
            failure: Some(UnitFailure {
                id: id("2-add-index"),
                name: "add index".to_string(),
                error: MigrateError::Operation {
                    id: id("2-add-index"),
                    message: "duplicate index".to_string(),
                },
            }),
            state: RunState::Failed(1),
            execution_time_ms: 12,
        };

        let out = render_report(&report);
        assert!(out.contains("FAILED: completed 1 of 2 migration(s), failed at 2-add-index"));
        assert!(out.contains("duplicate index"));
        assert_eq!(outcome_of(&report), CommandOutcome::Halted);
    }

    #[test]
    fn test_render_status() {
        let applied_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let status = StatusReport {
            entries: vec![
                StatusEntry {
                    id: id("1"),
                    name: "users".to_string(),
                    reversible: true,
                    status: MigrationStatus::Applied { applied_at, batch: 1 },
                },
                StatusEntry {
                    id: id("2"),
                    name: "posts".to_string(),
                    reversible: false,
                    status: MigrationStatus::Pending,
                },
            ],
            orphaned: vec![LedgerEntry {
                migration_id: "0-legacy".to_string(),
                batch: 1,
                applied_at,
            }],
        };

        let out = render_status(&status);
        assert!(out.contains("[applied] 1 - users (batch 1, 2024-01-02 03:04:05 UTC)"));
        assert!(out.contains("[pending] 2 - posts [irreversible]"));
        assert!(out.contains("0-legacy (batch 1)"));
        assert!(out.contains("Applied: 1, Pending: 1"));
    }
}
