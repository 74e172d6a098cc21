//! Migration Sources - where migration units come from
//!
//! Handles creating, loading, and parsing migration files from the filesystem,
//! and lets code-defined units be handed to the engine directly.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use super::definitions::MigrationUnit;
use crate::error::{MigrateError, MigrateResult};

static FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d{8}_\d{6}|\d+)[_-](?P<name>.+)$").expect("valid migration filename regex")
});

static SECTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^--\s*(up|down)(?:\s+migration)?\s*:?$").expect("valid section marker regex")
});

static SLUG_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

/// Supplies migration units to the registry
///
/// `load` must be deterministic for an unchanged source and may be called any
/// number of times.
pub trait MigrationSource: Send + Sync {
    fn load(&self) -> MigrateResult<Vec<MigrationUnit>>;

    /// Human readable origin, used in logs
    fn describe(&self) -> String;
}

impl MigrationSource for Vec<MigrationUnit> {
    fn load(&self) -> MigrateResult<Vec<MigrationUnit>> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        format!("{} in-memory migration(s)", self.len())
    }
}

/// Directory of `.sql` migration files
///
/// Each file holds an `-- Up` section and a `-- Down` section. The file stem is the
/// unit id.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse a migration file into a MigrationUnit
    fn parse_migration_file(&self, path: &Path) -> MigrateResult<MigrationUnit> {
        let content = fs::read_to_string(path).map_err(|e| {
            MigrateError::Source(format!(
                "Failed to read migration file {}: {}",
                path.display(),
                e
            ))
        })?;

        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                MigrateError::Source(format!("Invalid migration filename: {}", path.display()))
            })?;

        let (up_sql, down_sql) = parse_migration_content(&content);
        MigrationUnit::sql(id, &name_from_id(id), &up_sql, &down_sql)
    }
}

impl MigrationSource for DirectorySource {
    fn load(&self) -> MigrateResult<Vec<MigrationUnit>> {
        if !self.dir.exists() {
            tracing::debug!("Migrations directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| {
            MigrateError::Source(format!("Failed to read migrations directory: {}", e))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                MigrateError::Source(format!("Failed to read directory entry: {}", e))
            })?;

            let path = entry.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .iter()
            .map(|path| self.parse_migration_file(path))
            .collect()
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

/// Human readable name from an id such as `20240101_120000_add_users`
fn name_from_id(id: &str) -> String {
    FILENAME_PATTERN
        .captures(id)
        .and_then(|caps| caps.name("name"))
        .map(|name| name.as_str().replace(['_', '-'], " "))
        .unwrap_or_else(|| id.to_string())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Split migration content into its UP and DOWN SQL
///
/// Only a line that is nothing but a section marker switches sections; other
/// comments are dropped wherever they appear.
fn parse_migration_content(content: &str) -> (String, String) {
    let mut up_sql = Vec::new();
    let mut down_sql = Vec::new();
    let mut section = Section::Preamble;

    for line in content.lines() {
        let trimmed = line.trim();

        if let Some(caps) = SECTION_MARKER.captures(trimmed) {
            section = if caps[1].eq_ignore_ascii_case("up") {
                Section::Up
            } else {
                Section::Down
            };
            continue;
        }

        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        match section {
            Section::Up => up_sql.push(line),
            Section::Down => down_sql.push(line),
            Section::Preamble => {}
        }
    }

    (
        up_sql.join("\n").trim().to_string(),
        down_sql.join("\n").trim().to_string(),
    )
}

/// Lowercase slug with runs of other characters collapsed to `_`
fn slugify(name: &str) -> String {
    SLUG_SEPARATORS
        .replace_all(&name.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

/// Create a new migration file and return its path
pub fn create_migration(dir: &Path, name: &str) -> MigrateResult<PathBuf> {
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(MigrateError::Source(format!(
            "Migration name '{}' has no usable characters",
            name
        )));
    }

    fs::create_dir_all(dir).map_err(|e| {
        MigrateError::Source(format!("Failed to create migrations directory: {}", e))
    })?;

    let now = Utc::now();
    let migration_id = format!("{}_{}", now.format("%Y%m%d_%H%M%S"), slug);
    let filepath = dir.join(format!("{}.sql", migration_id));
    if filepath.exists() {
        return Err(MigrateError::DuplicateId {
            id: super::definitions::MigrationId::new(migration_id)?,
        });
    }

    let template = format!(
        "-- Migration: {}\n\
         -- ID: {}\n\
         -- Created: {}\n\n\
         -- Up migration\n\
         -- Add your schema changes here\n\n\n\
         -- Down migration\n\
         -- Add rollback statements here; leave empty for a one-way migration\n\n",
        name,
        migration_id,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    fs::write(&filepath, template)
        .map_err(|e| MigrateError::Source(format!("Failed to write migration file: {}", e)))?;

    tracing::info!("Created migration {}", filepath.display());
    Ok(filepath)
}
