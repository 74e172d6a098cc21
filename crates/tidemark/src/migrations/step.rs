//! Migration Steps - the forward and backward operations of a unit
//!
//! A step receives a [`Schema`] handle bound to the unit's transaction and issues
//! opaque schema mutations through it. The engine never inspects what a step does.

use async_trait::async_trait;
use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use super::schema_builder::SchemaBuilder;
use crate::backends::{BackendTransaction, SqlDialect};
use crate::error::StepError;

/// One direction of a migration unit
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Perform the schema change
    async fn run(&self, schema: &mut Schema<'_>) -> Result<(), StepError>;

    /// Short description used in logs and debug output
    fn describe(&self) -> String {
        "custom step".to_string()
    }

    /// True when the step does nothing at all
    fn is_noop(&self) -> bool {
        false
    }
}

/// Schema-mutation handle bound to one unit's transaction
pub struct Schema<'a> {
    tx: &'a mut dyn BackendTransaction,
}

impl<'a> Schema<'a> {
    pub fn new(tx: &'a mut dyn BackendTransaction) -> Self {
        Self { tx }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.tx.dialect()
    }

    /// A schema builder producing SQL for this handle's dialect
    pub fn builder(&self) -> SchemaBuilder {
        SchemaBuilder::new(self.dialect())
    }

    /// Execute a single statement
    pub async fn execute(&mut self, sql: &str) -> Result<u64, StepError> {
        tracing::debug!("Executing migration statement: {}", sql);
        Ok(self.tx.execute(sql, &[]).await?)
    }

    /// Execute a script that may contain several statements
    pub async fn execute_script(&mut self, sql: &str) -> Result<(), StepError> {
        for statement in split_sql_statements(sql, self.dialect()) {
            self.execute(&statement).await?;
        }
        Ok(())
    }

    /// Execute every statement collected by a schema builder
    pub async fn apply(&mut self, builder: &SchemaBuilder) -> Result<(), StepError> {
        for statement in builder.to_sql() {
            self.execute(&statement).await?;
        }
        Ok(())
    }
}

/// Step backed by a SQL script
#[derive(Debug, Clone)]
pub struct SqlStep {
    sql: String,
}

impl SqlStep {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

#[async_trait]
impl MigrationStep for SqlStep {
    async fn run(&self, schema: &mut Schema<'_>) -> Result<(), StepError> {
        schema.execute_script(&self.sql).await
    }

    fn describe(&self) -> String {
        let first_line = self.sql.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        format!("sql: {}", first_line.trim())
    }

    fn is_noop(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

/// Split a script into statements for execution
///
/// Statements are cut from the original text at top-level semicolons, so the
/// database sees exactly what the author wrote. When the dialect parser rejects
/// the script, or its statement count disagrees with the cut, the whole script
/// is returned as a single piece for the database to run as-is.
pub fn split_sql_statements(sql: &str, dialect: SqlDialect) -> Vec<String> {
    let parser_dialect: Box<dyn Dialect> = match dialect {
        SqlDialect::PostgreSQL => Box::new(PostgreSqlDialect {}),
        SqlDialect::SQLite => Box::new(SQLiteDialect {}),
    };

    let expected = match Parser::parse_sql(parser_dialect.as_ref(), sql) {
        Ok(parsed) => parsed.len(),
        Err(e) => {
            tracing::debug!("SQL parsing failed, running script as one batch: {}", e);
            return whole_script(sql);
        }
    };

    match cut_at_semicolons(sql, parser_dialect.as_ref()) {
        Some(statements) if statements.len() == expected => statements,
        _ => {
            tracing::debug!("Statement boundaries unclear, running script as one batch");
            whole_script(sql)
        }
    }
}

fn whole_script(sql: &str) -> Vec<String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![trimmed.to_string()]
    }
}

/// Original text between semicolon tokens, skipping pieces with no SQL in them
fn cut_at_semicolons(sql: &str, dialect: &dyn Dialect) -> Option<Vec<String>> {
    let tokens = Tokenizer::new(dialect, sql).tokenize_with_location().ok()?;

    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_sql = false;

    for token in &tokens {
        match token.token {
            Token::SemiColon => {
                let end = byte_offset(sql, token.location.line, token.location.column)?;
                if has_sql {
                    statements.push(sql[start..end].trim().to_string());
                }
                start = end + 1;
                has_sql = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => has_sql = true,
        }
    }

    if has_sql {
        statements.push(sql[start..].trim().to_string());
    }
    Some(statements)
}

/// Byte offset of a semicolon at a 1-based line and character column
fn byte_offset(sql: &str, line: u64, column: u64) -> Option<usize> {
    let line_index = usize::try_from(line.checked_sub(1)?).ok()?;
    let line_start = if line_index == 0 {
        0
    } else {
        sql.match_indices('\n').nth(line_index - 1)?.0 + 1
    };

    let column_index = usize::try_from(column.checked_sub(1)?).ok()?;
    let (offset, ch) = sql[line_start..].char_indices().nth(column_index)?;
    (ch == ';').then_some(line_start + offset)
}
