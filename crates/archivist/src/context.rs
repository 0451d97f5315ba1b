//! Explicit per-invocation state passed to every engine entry point.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::journal::{END, START};
use crate::models::Event;

/// Command names used as operation prefixes in the journal.
pub mod commands {
    pub const INIT: &str = "archivist.init";
    pub const IDENTIFY: &str = "archivist.identify";
    pub const REIDENTIFY: &str = "archivist.reidentify";
    pub const EXTRACT: &str = "archivist.extract";
    pub const EDIT_ACTION: &str = "archivist.edit.action";
    pub const EDIT_RENAME: &str = "archivist.edit.rename";
    pub const EDIT_LOCK: &str = "archivist.edit.lock";
    pub const EDIT_PROCESSED: &str = "archivist.edit.processed";
    pub const EDIT_VALUE: &str = "archivist.edit.value";
    pub const EDIT_REMOVE: &str = "archivist.edit.remove";
    pub const EDIT_ROLLBACK: &str = "archivist.edit.rollback";
}

#[derive(Debug, Clone)]
pub struct CommandContext {
    pub archive_root: PathBuf,
    /// Operation prefix for every event this invocation journals.
    pub command: String,
    pub dry_run: bool,
    pub reason: Option<String>,
    interrupted: Arc<AtomicBool>,
}

impl CommandContext {
    pub fn new(archive_root: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            archive_root: archive_root.into(),
            command: command.into(),
            dry_run: false,
            reason: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Share an interrupt flag, typically set from a Ctrl-C handler.
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    pub fn root(&self) -> &Path {
        &self.archive_root
    }

    pub fn operation(&self, verb: &str) -> String {
        format!("{}:{}", self.command, verb)
    }

    /// A new event for `verb` carrying this invocation's reason.
    pub fn event(&self, verb: &str) -> Event {
        Event::new(self.operation(verb)).with_reason(self.reason.as_deref())
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn check_interrupt(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Run `body` between `:start` and `:end` events.
    ///
    /// The end event is written on failure too, with the error chain. Dry runs
    /// journal nothing.
    pub fn run<T>(
        &self,
        db: &Database,
        data: Option<Value>,
        body: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        if self.dry_run {
            info!(command = %self.command, "Dry run, no changes will be written");
            return body();
        }

        let mut start = self.event(START);
        start.data = data;
        db.append_event(db.conn(), start)?;

        let result = body();

        let status = match &result {
            Ok(_) => json!({ "status": "ok" }),
            Err(err) => json!({
                "status": "error",
                "error": err.to_string(),
                "chain": err.chain(),
            }),
        };
        let end = self.event(END).with_data(status);
        if let Err(end_err) = db.append_event(db.conn(), end) {
            match result {
                Ok(_) => return Err(end_err),
                Err(_) => warn!("Failed to journal end of {}: {}", self.command, end_err),
            }
        }

        result
    }
}
