//! Append-only event journal and command runs.
//!
//! Every command that changes the catalog brackets its work with
//! `<command>:start` and `<command>:end` events. The pair is a [`Run`].

use archivist_db::{DbTimestamp, DbValue, OnConflict, Queryable, Select, TableExt};
use archivist_ids::RecordId;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::database::Database;
use crate::error::Result;
use crate::models::{command_of, Event, Record};

pub const START: &str = "start";
pub const END: &str = "end";
pub const EDIT: &str = "edit";
pub const NEW: &str = "new";
pub const REMOVE: &str = "remove";
pub const DELETE: &str = "delete";
pub const SKIP: &str = "skip";
pub const ERROR: &str = "error";
/// Rollback marker: the referenced run was fully reverted.
pub const RUN: &str = "run";
/// Rollback marker: the referenced run was partly reverted.
pub const RUN_PARTIAL: &str = "run:partial";

/// Filter for reading the journal.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Keep operations starting with this text.
    pub operation_prefix: Option<String>,
    /// Inclusive lower bound.
    pub from: Option<DbTimestamp>,
    /// Inclusive upper bound.
    pub to: Option<DbTimestamp>,
    pub file_uuid: Option<RecordId>,
    pub limit: Option<u64>,
    /// Newest first.
    pub descending: bool,
}

impl EventFilter {
    fn to_select(&self) -> Select {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(prefix) = &self.operation_prefix {
            clauses.push("operation LIKE ? ESCAPE '\\'".to_string());
            params.push(DbValue::from(format!("{}%", escape_like(prefix))));
        }
        if let Some(from) = self.from {
            clauses.push("time >= ?".to_string());
            params.push(DbValue::from(from));
        }
        if let Some(to) = self.to {
            clauses.push("time <= ?".to_string());
            params.push(DbValue::from(to));
        }
        if let Some(uuid) = &self.file_uuid {
            clauses.push("file_uuid = ?".to_string());
            params.push(DbValue::from(uuid.as_str()));
        }
        let order = if self.descending { "time DESC" } else { "time ASC" };
        let mut select = Select::new()
            .filter(clauses.join(" AND "), params)
            .order_by(order);
        if let Some(limit) = self.limit {
            select = select.limit(limit);
        }
        select
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// A bracketed command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub start: Event,
    pub end: Event,
}

impl Run {
    pub fn command(&self) -> &str {
        self.start.command()
    }

    /// False when the end event recorded an error.
    pub fn succeeded(&self) -> bool {
        self.end
            .data
            .as_ref()
            .and_then(|data| data.get("status"))
            .and_then(Value::as_str)
            .map(|status| status == "ok")
            .unwrap_or(true)
    }
}

impl Database {
    /// Append `event` through `conn`, assigning a strictly increasing time.
    pub fn append_event<Q: Queryable>(&self, conn: &Q, mut event: Event) -> Result<Event> {
        let last = match self.last_event.get() {
            Some(time) => time,
            None => conn
                .query_scalar::<Option<i64>>("SELECT MAX(time) FROM events", &[])?
                .unwrap_or(0),
        };
        let time = DbTimestamp::now().unix_micros().max(last + 1);
        event.time = DbTimestamp::from_unix_micros(time)?;
        conn.insert(&event, OnConflict::Abort)?;
        self.last_event.set(Some(time));
        Ok(event)
    }

    pub fn events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        Ok(self.conn().select::<Event>(&filter.to_select())?)
    }

    /// Events strictly between two times, newest first.
    pub fn events_between(&self, start: DbTimestamp, end: DbTimestamp) -> Result<Vec<Event>> {
        let select = Select::new()
            .filter(
                "time > ? AND time < ?",
                vec![DbValue::from(start), DbValue::from(end)],
            )
            .order_by("time DESC");
        Ok(self.conn().select::<Event>(&select)?)
    }

    /// All completed runs, newest first.
    ///
    /// A start without a matching end before the next start is skipped.
    pub fn runs(&self) -> Result<Vec<Run>> {
        let select = Select::new()
            .filter(
                "operation LIKE ? OR operation LIKE ?",
                vec![
                    DbValue::from(format!("%:{}", START)),
                    DbValue::from(format!("%:{}", END)),
                ],
            )
            .order_by("time ASC");
        let brackets = self.conn().select::<Event>(&select)?;

        let mut runs = Vec::new();
        let mut open: Option<Event> = None;
        for event in brackets {
            let verb = event.verb().to_string();
            match verb.as_str() {
                START => {
                    if let Some(unterminated) = open.replace(event) {
                        warn!(
                            operation = %unterminated.operation,
                            time = %unterminated.time,
                            "Run has no end event, skipping"
                        );
                    }
                }
                END => match open.take() {
                    Some(start) if start.command() == event.command() => {
                        runs.push(Run { start, end: event });
                    }
                    Some(start) => {
                        warn!(
                            operation = %start.operation,
                            time = %start.time,
                            "Run ended by a different command, skipping"
                        );
                    }
                    None => {}
                },
                _ => {}
            }
        }
        if let Some(unterminated) = open {
            debug!(
                operation = %unterminated.operation,
                time = %unterminated.time,
                "Latest run has not ended, skipping"
            );
        }

        runs.reverse();
        Ok(runs)
    }

    pub fn last_run(&self) -> Result<Option<Run>> {
        Ok(self.runs()?.into_iter().next())
    }
}

/// Log one record decision of a command.
pub fn log_event(event: &Event, record: Option<&Record>) {
    let uuid = event
        .file_uuid
        .as_ref()
        .map(|id| id.as_str().to_string())
        .unwrap_or_default();
    let path = record.map(Record::relative_path).unwrap_or("");
    let data = event
        .data
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_default();
    let verb = event.verb();
    let command = command_of(&event.operation);
    if verb == ERROR {
        error!(operation = %event.operation, uuid = %uuid, path = %path, data = %data, "{}", command);
    } else {
        info!(operation = %event.operation, uuid = %uuid, path = %path, data = %data, "{}", verb);
    }
}
