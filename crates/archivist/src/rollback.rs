//! Reverting command runs from the journal.
//!
//! A run's interior events are replayed newest first. Each operation that can
//! be reverted has a handler in a [`RollbackRegistry`]; events without one are
//! skipped. After a replay the rollback journals a marker against the run:
//! `:run` when everything was reverted, `:run:partial` when only part was.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use archivist_db::DbTimestamp;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::context::CommandContext;
use crate::database::{Database, RecordStore};
use crate::error::{Error, Result};
use crate::journal::{log_event, EventFilter, Run, ERROR, RUN, RUN_PARTIAL};
use crate::models::{Event, Record};

/// Inverse of one journaled operation.
///
/// Receives the event and the current state of its subject, if it still exists.
pub type RollbackHandler = fn(&CommandContext, &Database, &Event, Option<Record>) -> Result<()>;

/// Operation name to rollback handler.
#[derive(Default, Clone)]
pub struct RollbackRegistry {
    handlers: HashMap<String, RollbackHandler>,
}

impl fmt::Debug for RollbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackRegistry")
            .field("operations", &self.operations())
            .finish()
    }
}

impl RollbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation: impl Into<String>, handler: RollbackHandler) {
        self.handlers.insert(operation.into(), handler);
    }

    pub fn get(&self, operation: &str) -> Option<RollbackHandler> {
        self.handlers.get(operation).copied()
    }

    /// Registered operations, sorted.
    pub fn operations(&self) -> Vec<&str> {
        let mut operations: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        operations.sort_unstable();
        operations
    }
}

/// Which runs to roll back, counting back from the newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSelector {
    /// 1 is the most recent run.
    Index(usize),
    /// Inclusive range of indices.
    Range(usize, usize),
    /// The most recent run started at or before this time.
    Time(DbTimestamp),
}

impl FromStr for RunSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let invalid = || Error::InvalidSelector(s.to_string());

        if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
            let index: usize = text.parse().map_err(|_| invalid())?;
            return if index == 0 {
                Err(invalid())
            } else {
                Ok(RunSelector::Index(index))
            };
        }

        let range = text.split_once("..").or_else(|| text.split_once('-'));
        if let Some((low, high)) = range {
            if let (Ok(low), Ok(high)) = (low.trim().parse::<usize>(), high.trim().parse::<usize>()) {
                if low == 0 || high == 0 {
                    return Err(invalid());
                }
                return Ok(RunSelector::Range(low.min(high), low.max(high)));
            }
        }

        parse_time(text)
            .map(RunSelector::Time)
            .ok_or_else(invalid)
    }
}

/// Parse an RFC 3339 time, a naive date-time (UTC) or a date (end of that day, UTC).
pub fn parse_time(text: &str) -> Option<DbTimestamp> {
    if let Ok(timestamp) = DbTimestamp::from_rfc3339(text) {
        return Some(timestamp);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return Some(DbTimestamp::from_chrono(naive.and_utc()));
        }
    }
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| DbTimestamp::from_chrono(naive.and_utc()))
}

/// How much of a run earlier rollbacks reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStatus {
    None,
    Full,
    Partial,
}

/// Runs selected by `selector`, newest first, ignoring runs of `exclude_command`.
pub fn locate_runs(db: &Database, selector: RunSelector, exclude_command: &str) -> Result<Vec<Run>> {
    let runs: Vec<Run> = db
        .runs()?
        .into_iter()
        .filter(|run| run.command() != exclude_command)
        .collect();

    // Indices are 1-based; 0 reads as 1 and reversed ranges are swapped.
    let selected = match selector {
        RunSelector::Index(index) => runs.into_iter().skip(index.saturating_sub(1)).take(1).collect(),
        RunSelector::Range(low, high) => {
            let (low, high) = (low.min(high).max(1), low.max(high).max(1));
            runs.into_iter().skip(low - 1).take(high - low + 1).collect()
        }
        RunSelector::Time(time) => runs
            .into_iter()
            .find(|run| run.start.time <= time)
            .into_iter()
            .collect(),
    };
    Ok(selected)
}

/// Status of `run` according to the markers journaled by `rollback_command`.
pub fn rollback_status(db: &Database, rollback_command: &str, run: &Run) -> Result<RollbackStatus> {
    let markers = db.events(&EventFilter {
        operation_prefix: Some(format!("{}:{}", rollback_command, RUN)),
        from: Some(run.end.time),
        descending: true,
        ..Default::default()
    })?;
    let start = run.start.time.unix_micros();
    for marker in markers {
        let references_run = marker
            .data
            .as_ref()
            .and_then(|data| data.get("start"))
            .and_then(Value::as_i64)
            == Some(start);
        if !references_run {
            continue;
        }
        return Ok(match marker.verb() {
            RUN => RollbackStatus::Full,
            RUN_PARTIAL => RollbackStatus::Partial,
            _ => continue,
        });
    }
    Ok(RollbackStatus::None)
}

/// Result of one run's rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayResult {
    /// Every event with a handler was reverted.
    Completed,
    /// Some events were reverted, some failed.
    Partial,
    /// Every event with a handler failed; no marker was written.
    Failed,
    /// Not replayed because of an earlier rollback.
    Skipped(RollbackStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run: Run,
    pub reverted: usize,
    pub failed: usize,
    pub result: ReplayResult,
}

/// Roll back the runs chosen by `selector`, newest first.
///
/// Fully reverted runs are skipped, partly reverted ones too unless
/// `resume_partial` is set. A fatal error stops everything and is returned.
pub fn rollback(
    ctx: &CommandContext,
    db: &Database,
    registry: &RollbackRegistry,
    selector: RunSelector,
    resume_partial: bool,
) -> Result<Vec<RunReport>> {
    let runs = locate_runs(db, selector, &ctx.command)?;
    let mut reports = Vec::with_capacity(runs.len());

    for run in runs {
        ctx.check_interrupt()?;
        let status = rollback_status(db, &ctx.command, &run)?;
        let skip = match status {
            RollbackStatus::Full => true,
            RollbackStatus::Partial => !resume_partial,
            RollbackStatus::None => false,
        };
        if skip {
            info!(
                operation = %run.start.operation,
                time = %run.start.time,
                "Run already rolled back ({:?}), skipping",
                status
            );
            reports.push(RunReport {
                run,
                reverted: 0,
                failed: 0,
                result: ReplayResult::Skipped(status),
            });
            continue;
        }
        reports.push(replay(ctx, db, registry, run)?);
    }

    Ok(reports)
}

/// Revert the interior events of `run`, newest first.
pub fn replay(
    ctx: &CommandContext,
    db: &Database,
    registry: &RollbackRegistry,
    run: Run,
) -> Result<RunReport> {
    info!(
        operation = %run.start.operation,
        time = %run.start.time,
        "Rolling back run"
    );
    let events = db.events_between(run.start.time, run.end.time)?;
    let mut reverted = 0;
    let mut failed = 0;

    for event in &events {
        if let Err(err) = ctx.check_interrupt() {
            return Err(abort(ctx, db, &run, reverted, err));
        }
        let Some(handler) = registry.get(&event.operation) else {
            debug!(operation = %event.operation, time = %event.time, "No rollback handler");
            continue;
        };

        let outcome = current_subject(db, event).and_then(|current| handler(ctx, db, event, current));
        match outcome {
            Ok(()) => reverted += 1,
            Err(err) if err.is_fatal() => return Err(abort(ctx, db, &run, reverted, err)),
            Err(err) => {
                failed += 1;
                record_failure(ctx, db, event, &err)?;
            }
        }
    }

    let result = if failed == 0 {
        ReplayResult::Completed
    } else if reverted > 0 {
        ReplayResult::Partial
    } else {
        ReplayResult::Failed
    };
    match result {
        ReplayResult::Completed => mark(ctx, db, &run, RUN, None)?,
        ReplayResult::Partial => mark(
            ctx,
            db,
            &run,
            RUN_PARTIAL,
            Some(format!("{} of {} events failed", failed, failed + reverted)),
        )?,
        _ => warn!(operation = %run.start.operation, "No event could be rolled back"),
    }

    Ok(RunReport {
        run,
        reverted,
        failed,
        result,
    })
}

fn current_subject(db: &Database, event: &Event) -> Result<Option<Record>> {
    match event.subject() {
        Some((kind, uuid)) => db.conn().record(kind, uuid),
        None => Ok(None),
    }
}

/// Journal a partial marker if anything was reverted, then hand back `err`.
fn abort(ctx: &CommandContext, db: &Database, run: &Run, reverted: usize, err: Error) -> Error {
    if reverted > 0 {
        if let Err(mark_err) = mark(ctx, db, run, RUN_PARTIAL, Some(format!("{:?}", err))) {
            warn!("Failed to mark run as partially rolled back: {}", mark_err);
        }
    }
    err
}

fn mark(
    ctx: &CommandContext,
    db: &Database,
    run: &Run,
    verb: &str,
    error: Option<String>,
) -> Result<()> {
    let mut data = json!({
        "start": run.start.time.unix_micros(),
        "end": run.end.time.unix_micros(),
        "operation": run.start.operation,
    });
    if let Some(error) = error {
        data["error"] = Value::String(error);
    }
    let marker = ctx.event(verb).with_data(data);
    if !ctx.dry_run {
        db.append_event(db.conn(), marker.clone())?;
    }
    log_event(&marker, None);
    Ok(())
}

fn record_failure(ctx: &CommandContext, db: &Database, event: &Event, err: &Error) -> Result<()> {
    let mut failure = ctx.event(ERROR).with_data(json!({
        "time": event.time.unix_micros(),
        "operation": event.operation,
        "error": err.to_string(),
    }));
    failure.file_type = event.file_type;
    failure.file_uuid = event.file_uuid.clone();
    if !ctx.dry_run {
        db.append_event(db.conn(), failure.clone())?;
    }
    log_event(&failure, None);
    Ok(())
}
