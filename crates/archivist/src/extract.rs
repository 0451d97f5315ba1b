//! Unpacking archive originals into new original records.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::context::{commands, CommandContext};
use crate::database::Database;
use crate::edit::remove::rollback_new;
use crate::edit::{action_change, edit_record, patch_of, rollback_edit, select_matching, Change};
use crate::error::Result;
use crate::identify::{identify_batch, new_original, register_record, ActionCatalog, Identifier};
use crate::journal::{log_event, EDIT, NEW, SKIP};
use crate::models::{Action, ActionPayload, Record, RecordKind};
use crate::query::Query;
use crate::rollback::RollbackRegistry;

/// Suffix of the directory an archive is unpacked into, next to the archive.
pub const EXTRACTED_SUFFIX: &str = "_extracted";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Archive is password protected")]
    PasswordProtected,

    #[error("Unrecognized archive: {0}")]
    Unrecognized(String),

    #[error("Archive content is not preservable: {0}")]
    NotPreservable(String),

    #[error("Extraction failed: {0}")]
    Failed(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    /// Action that replaces `extract` on an archive that failed with this error.
    pub fn outcome(&self) -> ActionPayload {
        match self {
            ExtractError::PasswordProtected => ActionPayload::ignore("password-protected", None),
            ExtractError::Unrecognized(_) => ActionPayload::manual(
                "unrecognized archive",
                "Inspect the archive and extract it by hand",
            ),
            ExtractError::NotPreservable(reason) => {
                ActionPayload::ignore("not-preservable", Some(reason.clone()))
            }
            ExtractError::Failed(_) | ExtractError::Io { .. } => {
                ActionPayload::manual(self.to_string(), "Inspect the archive and extract it by hand")
            }
        }
    }

    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExtractError::Io {
            path: path.into(),
            source,
        }
    }
}

/// One file written by an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Location on disk.
    pub path: PathBuf,
    /// Name of the entry inside the archive.
    pub original_path: String,
}

pub trait Extractor {
    /// True if this extractor handles archives whose extract tool is `tool`.
    fn supports(&self, tool: &str) -> bool;

    /// Unpack `archive` into `destination`, which does not exist yet.
    fn extract(&self, archive: &Path, destination: &Path)
        -> std::result::Result<Vec<ExtractedFile>, ExtractError>;
}

/// Extracts zip archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

impl Extractor for ZipExtractor {
    fn supports(&self, tool: &str) -> bool {
        tool.eq_ignore_ascii_case("zip")
    }

    fn extract(
        &self,
        archive: &Path,
        destination: &Path,
    ) -> std::result::Result<Vec<ExtractedFile>, ExtractError> {
        let file = File::open(archive).map_err(|e| ExtractError::io(archive, e))?;
        let mut zip = ZipArchive::new(file).map_err(|err| match err {
            ZipError::Io(source) => ExtractError::io(archive, source),
            other => ExtractError::Unrecognized(other.to_string()),
        })?;

        if zip.len() == 0 {
            return Err(ExtractError::NotPreservable("archive is empty".to_string()));
        }
        for index in 0..zip.len() {
            let entry = zip.by_index_raw(index).map_err(zip_failure)?;
            if entry.encrypted() {
                return Err(ExtractError::PasswordProtected);
            }
        }

        fs::create_dir_all(destination).map_err(|e| ExtractError::io(destination, e))?;
        let mut extracted = Vec::new();
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index).map_err(zip_failure)?;
            let Some(name) = entry.enclosed_name().map(|name| name.to_path_buf()) else {
                return Err(ExtractError::Failed(format!(
                    "entry '{}' escapes the archive",
                    entry.name()
                )));
            };
            let target = destination.join(name);
            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| ExtractError::io(&target, e))?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
            }
            let mut out = File::create(&target).map_err(|e| ExtractError::io(&target, e))?;
            io::copy(&mut entry, &mut out).map_err(|e| ExtractError::io(&target, e))?;
            extracted.push(ExtractedFile {
                path: target,
                original_path: entry.name().to_string(),
            });
        }

        if extracted.is_empty() {
            return Err(ExtractError::NotPreservable(
                "archive holds only directories".to_string(),
            ));
        }
        Ok(extracted)
    }
}

fn zip_failure(err: ZipError) -> ExtractError {
    match err {
        ZipError::InvalidPassword => ExtractError::PasswordProtected,
        other => ExtractError::Failed(other.to_string()),
    }
}

/// Directory an archive at `archive` is unpacked into.
pub fn destination_for(archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    archive.with_file_name(format!("{}{}", name, EXTRACTED_SUFFIX))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub matched: usize,
    pub extracted: usize,
    /// Originals registered from extracted content.
    pub files: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Extract matching originals whose action is `extract` and that are not processed yet.
pub fn extract_archives(
    ctx: &CommandContext,
    db: &Database,
    extractor: &dyn Extractor,
    identifier: &dyn Identifier,
    catalog: &ActionCatalog,
    query: &Query,
) -> Result<ExtractSummary> {
    let records = select_matching(db, RecordKind::Original, query)?;
    let mut summary = ExtractSummary {
        matched: records.len(),
        ..Default::default()
    };

    for record in records {
        ctx.check_interrupt()?;
        let Some(file) = record.as_original() else {
            continue;
        };
        let tool = match (&file.action, &file.action_data.extract) {
            (Some(Action::Extract), Some(settings)) if !file.processed => settings.tool.clone(),
            _ => {
                skip(ctx, &record, "not an unprocessed archive");
                summary.skipped += 1;
                continue;
            }
        };
        if !extractor.supports(&tool) {
            skip(ctx, &record, &format!("no extractor for '{}'", tool));
            summary.skipped += 1;
            continue;
        }

        let archive = file.base.path(ctx.root());
        let destination = destination_for(&archive);
        if ctx.dry_run {
            info!(
                path = %record.relative_path(),
                destination = %destination.display(),
                "Would extract archive"
            );
            summary.extracted += 1;
            continue;
        }

        let preexisting = destination.exists();
        let outcome = if preexisting {
            Err(ExtractError::Failed(format!(
                "{} already exists",
                destination.display()
            )))
        } else {
            extractor.extract(&archive, &destination)
        };

        match outcome {
            Ok(files) => {
                summary.files += register_extracted(ctx, db, identifier, catalog, &record, &files)?;
                edit_record(ctx, db, &record, patch_of("processed", Value::Bool(true)))?;
                summary.extracted += 1;
            }
            Err(err) => {
                warn!(path = %record.relative_path(), "Extraction failed: {}", err);
                if !preexisting && destination.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&destination) {
                        warn!("Failed to clean up {}: {}", destination.display(), cleanup);
                    }
                }
                if let Change::Set(patch) = action_change(&record, &err.outcome())? {
                    edit_record(ctx, db, &record, patch)?;
                }
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

fn register_extracted(
    ctx: &CommandContext,
    db: &Database,
    identifier: &dyn Identifier,
    catalog: &ActionCatalog,
    archive: &Record,
    files: &[ExtractedFile],
) -> Result<usize> {
    let paths: Vec<PathBuf> = files.iter().map(|file| file.path.clone()).collect();
    let results = identify_batch(identifier, &paths);
    for (extracted, result) in files.iter().zip(results) {
        let mut file = new_original(ctx.root(), &extracted.path, catalog, &result)?;
        file.parent = Some(archive.uuid().clone());
        file.original_path = Some(extracted.original_path.clone());
        register_record(ctx, db, Record::Original(file))?;
    }
    Ok(files.len())
}

fn skip(ctx: &CommandContext, record: &Record, why: &str) {
    let event = ctx
        .event(SKIP)
        .with_record(record)
        .with_data(Value::String(why.to_string()));
    log_event(&event, Some(record));
}

pub fn register_rollback(registry: &mut RollbackRegistry) {
    registry.register(format!("{}:{}", commands::EXTRACT, NEW), rollback_new);
    registry.register(format!("{}:{}", commands::EXTRACT, EDIT), rollback_edit);
}
