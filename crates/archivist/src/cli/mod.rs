//! Command layer: argument handling, catalog access and console output.

pub mod config;
pub mod edit;
pub mod error;
pub mod extract;
pub mod identify;
pub mod info;
pub mod init;
pub mod log;
pub mod output;
pub mod search;
pub mod upgrade;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use archivist::{CommandContext, Database, Error, Query, QueryCompiler, RecordKind};
use archivist_db::{lock_holder, DbError};
use serde_json::Value;

use error::HelpfulError;

/// Per-invocation state shared by all commands.
pub struct Session {
    pub root: PathBuf,
    interrupted: Arc<AtomicBool>,
}

impl Session {
    pub fn new(root: PathBuf, interrupted: Arc<AtomicBool>) -> Self {
        Self { root, interrupted }
    }

    pub fn database_path(&self) -> PathBuf {
        Database::path_for(&self.root)
    }

    /// Open the catalog for writing.
    pub fn open(&self) -> anyhow::Result<Database> {
        let path = self.database_path();
        Database::open(&path).map_err(|err| explain(err, &path))
    }

    /// Open the catalog without the writer lock.
    pub fn open_readonly(&self) -> anyhow::Result<Database> {
        let path = self.database_path();
        Database::open_readonly(&path).map_err(|err| explain(err, &path))
    }

    pub fn context(&self, command: &str, reason: Option<String>, dry_run: bool) -> CommandContext {
        let ctx = CommandContext::new(&self.root, command)
            .with_dry_run(dry_run)
            .with_interrupt_flag(self.interrupted.clone());
        match reason {
            Some(reason) => ctx.with_reason(reason),
            None => ctx,
        }
    }
}

/// Run `body` as one journaled run and turn engine errors into helpful ones.
pub fn journaled<T>(
    ctx: &CommandContext,
    db: &Database,
    data: Value,
    body: impl FnOnce() -> archivist::Result<T>,
) -> anyhow::Result<T> {
    let path = db.conn().path().map(Path::to_path_buf).unwrap_or_default();
    ctx.run(db, Some(data), body)
        .map_err(|err| explain(err, &path))
}

/// Map engine errors that the user can act on to a [`HelpfulError`].
pub fn explain(err: Error, db_path: &Path) -> anyhow::Error {
    match err {
        Error::NotInitialized(path) => HelpfulError::new(format!(
            "No catalog database at {}",
            path.display()
        ))
        .with_context("The archive root has not been initialized")
        .with_suggestions([
            "TRY: Initialize it: archivist init --root <ARCHIVE>".to_string(),
            "TRY: Point --root (or ARCHIVIST_ROOT) at an initialized archive".to_string(),
        ])
        .into(),
        Error::UpgradeRequired { found, expected } => HelpfulError::new(format!(
            "Catalog version {} does not match {}",
            found, expected
        ))
        .with_context(format!("Database: {}", db_path.display()))
        .with_suggestion("TRY: Check the catalog with: archivist upgrade")
        .into(),
        Error::Db(DbError::Locked(path)) => {
            let holder = lock_holder(db_path)
                .map(|holder| {
                    format!(
                        "Held by pid {} ({}) since {}",
                        holder.pid,
                        holder.command,
                        holder.since.format("%Y-%m-%d %H:%M:%S UTC")
                    )
                })
                .unwrap_or_else(|| "Held by another process".to_string());
            HelpfulError::new(format!("Catalog is locked: {}", path))
                .with_context(holder)
                .with_suggestions([
                    "TRY: Wait for the other archivist command to finish".to_string(),
                    "TRY: Read-only commands (search, log, info) work while it runs".to_string(),
                ])
                .into()
        }
        Error::Query(query_err) => HelpfulError::new(format!("Invalid query: {}", query_err))
            .with_context("Queries are values, optionally preceded by @field selectors")
            .with_suggestions([
                "TRY: @puid fmt/40 fmt/41".to_string(),
                "TRY: @relative_path @like %.pdf".to_string(),
                "TRY: @warning @notnull".to_string(),
                "TRY: @uuid @file uuids.txt".to_string(),
            ])
            .into(),
        Error::InvalidSelector(selector) => {
            HelpfulError::new(format!("Invalid run selector '{}'", selector))
                .with_context("Runs are counted back from the most recent one, starting at 1")
                .with_suggestions([
                    "TRY: 1 (the last run)".to_string(),
                    "TRY: 2-4 (the second to fourth most recent runs)".to_string(),
                    "TRY: 2024-03-01T12:00:00Z (the last run started before that time)"
                        .to_string(),
                ])
                .into()
        }
        other => anyhow::Error::new(other),
    }
}

/// Compile `input` against the columns of `kind`.
pub fn compile_query(kind: RecordKind, input: &str) -> anyhow::Result<Query> {
    QueryCompiler::new(kind.columns(), "uuid")
        .parse(input)
        .map_err(|err| {
            HelpfulError::new(format!("Invalid query: {}", err))
                .with_context(format!(
                    "Fields of {} records: {}",
                    kind,
                    kind.columns().join(", ")
                ))
                .with_suggestions([
                    "TRY: @puid fmt/40 fmt/41".to_string(),
                    "TRY: @relative_path @like %.pdf".to_string(),
                    "TRY: @warning @notnull".to_string(),
                ])
                .into()
        })
}

/// Reasons are stored for audit and may not be blank.
pub fn require_reason(reason: &str) -> anyhow::Result<String> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(HelpfulError::new("A reason is required")
            .with_context("Every change is journaled together with its reason")
            .with_suggestion("TRY: Pass a short explanation as the REASON argument")
            .into());
    }
    Ok(trimmed.to_string())
}

pub fn parse_kind(value: &str) -> Result<RecordKind, String> {
    value.parse::<RecordKind>().map_err(|err| err.to_string())
}

/// Print what a command did, prefixed for dry runs.
pub fn report(ctx: &CommandContext, line: impl AsRef<str>) {
    if ctx.dry_run {
        println!("[dry run] {}", line.as_ref());
    } else {
        println!("{}", line.as_ref());
    }
}
