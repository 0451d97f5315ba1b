//! Renaming files on disk and in the catalog together.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde_json::{json, Value};
use tracing::error;

use super::{missing_subject, patch_of, select_matching, EditSummary};
use crate::context::{commands, CommandContext};
use crate::database::{Database, RecordStore};
use crate::error::{Error, Result};
use crate::journal::{log_event, EDIT, SKIP};
use crate::models::{Event, Record, RecordKind};
use crate::query::Query;
use crate::rollback::RollbackRegistry;

/// How a new extension is combined with the current name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionPolicy {
    /// Add the extension unless the name already ends with it.
    Append,
    /// Replace the last extension, or append if there is none.
    ReplaceLast,
    /// Replace every trailing extension.
    ReplaceAll,
}

const EXTENSION: &str = r"\.[A-Za-z0-9]{1,10}";

/// `name` with `extension` applied under `policy`.
pub fn renamed(name: &str, extension: &str, policy: ExtensionPolicy) -> Result<String> {
    let extension = normalize_extension(extension)?;
    let renamed = match policy {
        ExtensionPolicy::Append => {
            if name.to_lowercase().ends_with(&extension.to_lowercase()) {
                name.to_string()
            } else {
                format!("{}{}", name, extension)
            }
        }
        ExtensionPolicy::ReplaceLast => {
            let pattern = regex(&format!(r"^(.+?)({})$", EXTENSION))?;
            format!("{}{}", stem(&pattern, name), extension)
        }
        ExtensionPolicy::ReplaceAll => {
            let pattern = regex(&format!(r"^(.+?)((?:{})+)$", EXTENSION))?;
            format!("{}{}", stem(&pattern, name), extension)
        }
    };
    Ok(renamed)
}

fn normalize_extension(extension: &str) -> Result<String> {
    let trimmed = extension.trim();
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(Error::invalid_value(
            "extension",
            format!("'{}' contains a path separator", extension),
        ));
    }
    if trimmed.is_empty() || trimmed.starts_with('.') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!(".{}", trimmed))
    }
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::invalid_value("extension", e.to_string()))
}

fn stem<'a>(pattern: &Regex, name: &'a str) -> &'a str {
    pattern
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|stem| stem.as_str())
        .unwrap_or(name)
}

fn with_name(relative_path: &str, name: &str) -> String {
    match relative_path.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, name),
        None => name.to_string(),
    }
}

/// Rename matching records of `kind` by changing their extension.
pub fn rename_matching(
    ctx: &CommandContext,
    db: &Database,
    kind: RecordKind,
    query: &Query,
    extension: &str,
    policy: ExtensionPolicy,
) -> Result<EditSummary> {
    let records = select_matching(db, kind, query)?;
    let mut summary = EditSummary {
        matched: records.len(),
        ..Default::default()
    };
    for record in records {
        ctx.check_interrupt()?;
        let name = renamed(record.base().name(), extension, policy)?;
        let target = with_name(record.relative_path(), &name);
        match rename_record(ctx, db, &record, &target)? {
            Some(_) => summary.edited += 1,
            None => summary.skipped += 1,
        }
    }
    Ok(summary)
}

/// Move `record`'s file to `new_relative` and update the record.
///
/// If the record update fails the file is moved back before the error is
/// returned. Returns `None` when the path is unchanged.
pub fn rename_record(
    ctx: &CommandContext,
    db: &Database,
    record: &Record,
    new_relative: &str,
) -> Result<Option<Record>> {
    let old_relative = record.relative_path().to_string();
    let old = patch_of("relative_path", Value::String(old_relative.clone()));
    let new = patch_of("relative_path", Value::String(new_relative.to_string()));
    let data = json!([Value::Object(old), Value::Object(new.clone())]);

    if old_relative == new_relative {
        log_event(&ctx.event(SKIP).with_record(record).with_data(data), Some(record));
        return Ok(None);
    }

    let updated = record.patched(&new)?;
    let event = ctx.event(EDIT).with_record(record).with_data(data);
    if ctx.dry_run {
        log_event(&event, Some(&updated));
        return Ok(Some(updated));
    }

    let old_path = record.base().path(ctx.root());
    let new_path = updated.base().path(ctx.root());
    let case_only = old_relative.to_lowercase() == new_relative.to_lowercase();
    if new_path.exists() && !case_only {
        return Err(Error::FileExists(new_path));
    }

    fs::rename(&old_path, &new_path).map_err(|e| Error::io(&old_path, e))?;
    let stored = db.transaction(|tx| {
        tx.update_record(&updated)?;
        db.append_event(tx, event.clone())?;
        Ok(())
    });
    if let Err(err) = stored {
        restore(&new_path, &old_path);
        return Err(err);
    }

    log_event(&event, Some(&updated));
    Ok(Some(updated))
}

fn restore(moved: &Path, original: &Path) {
    if let Err(e) = fs::rename(moved, original) {
        error!(
            "Failed to move {} back to {}: {}",
            moved.display(),
            original.display(),
            e
        );
    }
}

/// Inverse of a rename: move the file back to its old path.
pub fn rollback_rename(
    ctx: &CommandContext,
    db: &Database,
    event: &Event,
    record: Option<Record>,
) -> Result<()> {
    let record = record.ok_or_else(|| missing_subject(event))?;
    let (old, _) = event.edit_patches()?;
    let old_relative = old
        .get("relative_path")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::corrupt_event(event.time, "rename without old relative_path"))?;
    rename_record(ctx, db, &record, old_relative)?;
    Ok(())
}

pub fn register_rollback(registry: &mut RollbackRegistry) {
    registry.register(format!("{}:{}", commands::EDIT_RENAME, EDIT), rollback_rename);
}
