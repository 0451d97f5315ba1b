//! Format identification of archive files and action assignment.
//!
//! The [`Identifier`] seam hides the external identification tool. The
//! [`ActionCatalog`] maps the returned format codes onto processing actions.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::context::{commands, CommandContext};
use crate::database::{Database, RecordStore, METADATA_DIR};
use crate::edit::remove::rollback_new;
use crate::edit::{apply_edits, rollback_edit, select_matching, Change, EditSummary};
use crate::error::{Error, Result};
use crate::journal::{log_event, EDIT, NEW};
use crate::models::{
    path_to_relative, Action, ActionData, FileBase, ManualAction, OriginalFile, Patch, Record,
    RecordKind,
};
use crate::query::Query;
use crate::rollback::RollbackRegistry;

/// Files handed to the identifier per call.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// What the identification tool reported for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    pub puid: Option<String>,
    pub signature: Option<String>,
    pub warning: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    Tool {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Unreadable identifier output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("No identification returned for {}", .0.display())]
    Missing(PathBuf),
}

impl IdentifyError {
    /// Stable short name, used as the reason of the manual action it causes.
    pub fn class_name(&self) -> &'static str {
        match self {
            IdentifyError::Spawn { .. } => "IdentifierNotFound",
            IdentifyError::Tool { .. } => "IdentifierFailed",
            IdentifyError::Output(_) => "IdentifierOutputError",
            IdentifyError::Missing(_) => "IdentificationMissing",
        }
    }
}

pub type IdentifyResult<T> = std::result::Result<T, IdentifyError>;

/// External format identification.
pub trait Identifier {
    /// Identify a batch of files. The map is keyed by the paths as given.
    fn identify(&self, paths: &[PathBuf]) -> IdentifyResult<HashMap<PathBuf, Identification>>;
}

/// Runs siegfried (`sf -json`) and reads its PRONOM matches.
#[derive(Debug, Clone)]
pub struct SiegfriedIdentifier {
    pub program: PathBuf,
    /// Signature file passed with `-sig`.
    pub signature_file: Option<PathBuf>,
}

impl Default for SiegfriedIdentifier {
    fn default() -> Self {
        Self {
            program: PathBuf::from("sf"),
            signature_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SiegfriedOutput {
    #[serde(default)]
    files: Vec<SiegfriedFile>,
}

#[derive(Debug, Deserialize)]
struct SiegfriedFile {
    filename: String,
    #[serde(default)]
    errors: String,
    #[serde(default)]
    matches: Vec<SiegfriedMatch>,
}

#[derive(Debug, Deserialize)]
struct SiegfriedMatch {
    #[serde(default)]
    ns: String,
    id: String,
    #[serde(default)]
    format: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    warning: String,
}

impl Identifier for SiegfriedIdentifier {
    fn identify(&self, paths: &[PathBuf]) -> IdentifyResult<HashMap<PathBuf, Identification>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let program = self.program.display().to_string();
        let mut command = Command::new(&self.program);
        command.arg("-json");
        if let Some(signature_file) = &self.signature_file {
            command.arg("-sig").arg(signature_file);
        }
        let output = command
            .args(paths)
            .output()
            .map_err(|source| IdentifyError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(IdentifyError::Tool {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_siegfried(&output.stdout)
    }
}

/// Parse `sf -json` output into identifications keyed by file name.
pub fn parse_siegfried(output: &[u8]) -> IdentifyResult<HashMap<PathBuf, Identification>> {
    let parsed: SiegfriedOutput = serde_json::from_slice(output)?;
    let mut results = HashMap::with_capacity(parsed.files.len());
    for file in parsed.files {
        let best = file
            .matches
            .iter()
            .find(|m| m.ns.is_empty() || m.ns == "pronom")
            .or_else(|| file.matches.first());

        let mut identification = Identification::default();
        if let Some(best) = best {
            if !best.id.is_empty() && !best.id.eq_ignore_ascii_case("UNKNOWN") {
                identification.puid = Some(best.id.clone());
                identification.signature = non_empty(match best.version.as_str() {
                    "" => best.format.clone(),
                    version => format!("{} ({})", best.format, version),
                });
            }
            identification.warning = non_empty(best.warning.clone());
        }
        if !file.errors.is_empty() {
            identification.warning = Some(match identification.warning {
                Some(warning) => format!("{}; {}", warning, file.errors),
                None => file.errors.clone(),
            });
        }
        results.insert(PathBuf::from(file.filename), identification);
    }
    Ok(results)
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Identify `paths` in one call, falling back to one call per file when the
/// batch fails so a single bad file does not fail its neighbours.
pub fn identify_batch(
    identifier: &dyn Identifier,
    paths: &[PathBuf],
) -> Vec<IdentifyResult<Identification>> {
    match identifier.identify(paths) {
        Ok(mut found) => paths
            .iter()
            .map(|path| {
                found
                    .remove(path)
                    .ok_or_else(|| IdentifyError::Missing(path.clone()))
            })
            .collect(),
        Err(err) if paths.len() > 1 => {
            warn!("Batch identification failed, retrying file by file: {}", err);
            paths
                .iter()
                .map(|path| identify_batch(identifier, std::slice::from_ref(path)).remove(0))
                .collect()
        }
        Err(err) => vec![Err(err)],
    }
}

/// One action catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Human readable format name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub action: Action,
    #[serde(flatten)]
    pub data: ActionData,
}

/// Format code to processing action, read from `actions.toml`:
///
/// ```toml
/// ["fmt/43"]
/// name = "JPEG File Interchange Format"
/// action = "convert"
/// convert = { tool = "imagemagick", output = "tif" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ActionCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&text).map_err(|err| match err {
            Error::InvalidValue { field, message } => Error::InvalidValue {
                field,
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let entries: BTreeMap<String, CatalogEntry> = toml::from_str(text)
            .map_err(|e| Error::invalid_value("actions", e.message().to_string()))?;
        for (puid, entry) in &entries {
            crate::edit::validate_action_data(entry.action, &entry.data).map_err(|_| {
                Error::invalid_value(
                    "actions",
                    format!("entry '{}' has no {} settings", puid, entry.action),
                )
            })?;
        }
        Ok(Self { entries })
    }

    pub fn get(&self, puid: &str) -> Option<&CatalogEntry> {
        self.entries.get(puid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Action and payload for a file with format code `puid`.
    pub fn assignment(&self, puid: Option<&str>) -> (Action, ActionData) {
        match puid {
            None => manual("No format identified"),
            Some(puid) => match self.get(puid) {
                Some(entry) => (entry.action, entry.data.clone()),
                None => manual(&format!("No action defined for {}", puid)),
            },
        }
    }
}

fn manual(reason: &str) -> (Action, ActionData) {
    let data = ActionData {
        manual: Some(ManualAction {
            reason: reason.to_string(),
            process: "Identify and process the file manually".to_string(),
        }),
        ..Default::default()
    };
    (Action::Manual, data)
}

/// Identification fields plus the assigned action for one identifier result.
pub fn classify(
    catalog: &ActionCatalog,
    result: &IdentifyResult<Identification>,
) -> (Identification, Action, ActionData) {
    match result {
        Ok(identification) => {
            let (action, data) = catalog.assignment(identification.puid.as_deref());
            (identification.clone(), action, data)
        }
        Err(err) => {
            let (action, data) = manual(err.class_name());
            let identification = Identification {
                warning: Some(err.to_string()),
                ..Default::default()
            };
            (identification, action, data)
        }
    }
}

/// Hex blake3 digest and size of a file.
pub fn checksum(path: &Path) -> Result<(String, i64)> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let size = io::copy(&mut file, &mut hasher).map_err(|e| Error::io(path, e))?;
    Ok((hasher.finalize().to_hex().to_string(), size as i64))
}

/// An original record for `path`, not yet stored.
pub fn new_original(
    root: &Path,
    path: &Path,
    catalog: &ActionCatalog,
    result: &IdentifyResult<Identification>,
) -> Result<OriginalFile> {
    let relative = path_to_relative(root, path)
        .ok_or_else(|| Error::invalid_value("path", format!("{} is outside the archive", path.display())))?;
    let (checksum, size) = checksum(path)?;
    let (identification, action, data) = classify(catalog, result);

    let mut file = OriginalFile::new(FileBase::new(relative, checksum, size));
    file.base.puid = identification.puid;
    file.base.signature = identification.signature;
    file.base.warning = identification.warning;
    file.action = Some(action);
    file.action_data = data;
    Ok(file)
}

/// Store a new record and journal it.
pub fn register_record(ctx: &CommandContext, db: &Database, record: Record) -> Result<Record> {
    let event = ctx
        .event(NEW)
        .with_record(&record)
        .with_data(serde_json::to_value(&record)?);
    if !ctx.dry_run {
        db.transaction(|tx| {
            tx.insert_record(&record)?;
            db.append_event(tx, event.clone())?;
            Ok(())
        })?;
    }
    log_event(&event, Some(&record));
    Ok(record)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentifySummary {
    pub found: usize,
    pub registered: usize,
    /// Files the identifier could not handle; they were registered as manual.
    pub failed: usize,
}

/// Unregistered files below the archive root, in path order.
pub fn unregistered_files(root: &Path, db: &Database) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !(entry.depth() == 1 && entry.file_name() == METADATA_DIR));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = path_to_relative(root, entry.path()) else {
            continue;
        };
        if db.conn().is_registered(&relative)? {
            debug!(path = %relative, "Already registered");
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

/// Register every unregistered file below the archive root as an original.
pub fn identify_new_files(
    ctx: &CommandContext,
    db: &Database,
    identifier: &dyn Identifier,
    catalog: &ActionCatalog,
    batch_size: usize,
) -> Result<IdentifySummary> {
    let files = unregistered_files(ctx.root(), db)?;
    let mut summary = IdentifySummary {
        found: files.len(),
        ..Default::default()
    };
    info!(count = files.len(), "Found unregistered files");

    for batch in files.chunks(batch_size.max(1)) {
        ctx.check_interrupt()?;
        let results = identify_batch(identifier, batch);
        for (path, result) in batch.iter().zip(results) {
            if result.is_err() {
                summary.failed += 1;
            }
            let file = new_original(ctx.root(), path, catalog, &result)?;
            register_record(ctx, db, Record::Original(file))?;
            summary.registered += 1;
        }
    }
    Ok(summary)
}

/// Identify matching originals again and update their identification and action.
///
/// Locked originals are left alone.
pub fn reidentify(
    ctx: &CommandContext,
    db: &Database,
    identifier: &dyn Identifier,
    catalog: &ActionCatalog,
    query: &Query,
    batch_size: usize,
) -> Result<EditSummary> {
    let records = select_matching(db, RecordKind::Original, query)?;

    let mut pending = Vec::new();
    for record in &records {
        let Some(file) = record.as_original() else {
            continue;
        };
        let path = file.base.path(ctx.root());
        if !file.lock && path.is_file() {
            pending.push((record.uuid().clone(), path));
        }
    }

    let mut results = HashMap::with_capacity(pending.len());
    for batch in pending.chunks(batch_size.max(1)) {
        ctx.check_interrupt()?;
        let paths: Vec<PathBuf> = batch.iter().map(|(_, path)| path.clone()).collect();
        for ((uuid, _), result) in batch.iter().zip(identify_batch(identifier, &paths)) {
            results.insert(uuid.clone(), result);
        }
    }

    apply_edits(ctx, db, records, |record| {
        let Some(file) = record.as_original() else {
            return Ok(Change::Skip("not an original".to_string()));
        };
        if file.lock {
            return Ok(Change::Skip("locked".to_string()));
        }
        let Some(result) = results.get(record.uuid()) else {
            warn!(path = %record.relative_path(), "File is missing from the archive");
            return Ok(Change::Skip("file missing".to_string()));
        };
        let (identification, action, data) = classify(catalog, result);
        Ok(Change::Set(identification_patch(&identification, action, &data)?))
    })
}

fn identification_patch(
    identification: &Identification,
    action: Action,
    data: &ActionData,
) -> Result<Patch> {
    let optional = |value: &Option<String>| {
        value
            .as_ref()
            .map_or(Value::Null, |text| Value::String(text.clone()))
    };
    let mut patch = Patch::new();
    patch.insert("puid".into(), optional(&identification.puid));
    patch.insert("signature".into(), optional(&identification.signature));
    patch.insert("warning".into(), optional(&identification.warning));
    patch.insert("action".into(), Value::String(action.as_str().to_string()));
    patch.insert("action_data".into(), serde_json::to_value(data)?);
    Ok(patch)
}

pub fn register_rollback(registry: &mut RollbackRegistry) {
    registry.register(format!("{}:{}", commands::IDENTIFY, NEW), rollback_new);
    registry.register(format!("{}:{}", commands::REIDENTIFY, EDIT), rollback_edit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryCompiler;
    use std::cell::Cell;
    use std::fs;
    use tempfile::TempDir;

    /// Identifies by file extension; names containing "broken" fail.
    #[derive(Default)]
    struct ByExtension {
        calls: Cell<usize>,
    }

    impl Identifier for ByExtension {
        fn identify(&self, paths: &[PathBuf]) -> IdentifyResult<HashMap<PathBuf, Identification>> {
            self.calls.set(self.calls.get() + 1);
            let mut found = HashMap::new();
            for path in paths {
                let name = path.file_name().unwrap().to_string_lossy();
                if name.contains("broken") {
                    return Err(IdentifyError::Tool {
                        program: "sf".into(),
                        status: "exit status: 1".into(),
                        stderr: format!("cannot read {}", name),
                    });
                }
                let puid = match path.extension().and_then(|e| e.to_str()) {
                    Some("pdf") => Some("fmt/276".to_string()),
                    Some("doc") => Some("fmt/40".to_string()),
                    _ => None,
                };
                found.insert(
                    path.clone(),
                    Identification {
                        signature: puid.as_ref().map(|p| format!("format {}", p)),
                        puid,
                        warning: None,
                    },
                );
            }
            Ok(found)
        }
    }

    const CATALOG: &str = r#"
        ["fmt/276"]
        name = "Acrobat PDF/A"
        action = "ignore"
        ignore = { template = "already-preserved" }

        ["fmt/40"]
        action = "convert"
        convert = { tool = "libreoffice", output = "odt" }
    "#;

    fn setup() -> (TempDir, Database, ActionCatalog) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::create_dir_all(root.join(METADATA_DIR)).unwrap();
        fs::write(root.join("docs/a.pdf"), b"%PDF-1.4").unwrap();
        fs::write(root.join("docs/b.doc"), b"doc").unwrap();
        fs::write(root.join("docs/broken.doc"), b"??").unwrap();
        fs::write(root.join("notes.xyz"), b"plain").unwrap();
        fs::write(root.join(METADATA_DIR).join("ignored.log"), b"log").unwrap();
        let db = Database::create(&Database::path_for(root)).unwrap();
        (dir, db, ActionCatalog::from_toml_str(CATALOG).unwrap())
    }

    fn original(db: &Database, relative: &str) -> OriginalFile {
        let record = db
            .conn()
            .record_by_path(RecordKind::Original, relative)
            .unwrap()
            .unwrap();
        record.as_original().unwrap().clone()
    }

    #[test]
    fn parses_siegfried_output() {
        let output = br#"{
            "siegfried": "1.11.0",
            "files": [
                {"filename": "/a/report.pdf", "filesize": 10, "errors": "",
                 "matches": [{"ns": "pronom", "id": "fmt/276", "format": "Acrobat PDF/A",
                              "version": "1b", "warning": ""}]},
                {"filename": "/a/blob", "filesize": 3, "errors": "empty source",
                 "matches": [{"ns": "pronom", "id": "UNKNOWN", "format": "", "version": "",
                              "warning": "no match"}]}
            ]
        }"#;
        let results = parse_siegfried(output).unwrap();
        let pdf = &results[&PathBuf::from("/a/report.pdf")];
        assert_eq!(pdf.puid.as_deref(), Some("fmt/276"));
        assert_eq!(pdf.signature.as_deref(), Some("Acrobat PDF/A (1b)"));
        assert_eq!(pdf.warning, None);

        let blob = &results[&PathBuf::from("/a/blob")];
        assert_eq!(blob.puid, None);
        assert_eq!(blob.warning.as_deref(), Some("no match; empty source"));
    }

    #[test]
    fn catalog_rejects_entries_without_settings() {
        let err = ActionCatalog::from_toml_str("[\"fmt/1\"]\naction = \"convert\"\n").unwrap_err();
        assert!(err.to_string().contains("fmt/1"));
    }

    #[test]
    fn assignment_falls_back_to_manual() {
        let catalog = ActionCatalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.assignment(Some("fmt/40")).0, Action::Convert);

        let (action, data) = catalog.assignment(Some("fmt/999"));
        assert_eq!(action, Action::Manual);
        assert!(data.manual.unwrap().reason.contains("fmt/999"));

        let (_, data) = catalog.assignment(None);
        assert_eq!(data.manual.unwrap().reason, "No format identified");
    }

    #[test]
    fn batch_failure_retries_per_file() {
        let identifier = ByExtension::default();
        let paths = vec![PathBuf::from("x/a.pdf"), PathBuf::from("x/broken.pdf")];
        let results = identify_batch(&identifier, &paths);
        assert_eq!(identifier.calls.get(), 3);
        assert_eq!(results[0].as_ref().unwrap().puid.as_deref(), Some("fmt/276"));
        assert_eq!(results[1].as_ref().unwrap_err().class_name(), "IdentifierFailed");
    }

    #[test]
    fn identify_registers_new_files() {
        let (dir, db, catalog) = setup();
        let ctx = CommandContext::new(dir.path(), commands::IDENTIFY);

        let summary = identify_new_files(&ctx, &db, &ByExtension::default(), &catalog, 10).unwrap();
        assert_eq!(summary.found, 4);
        assert_eq!(summary.registered, 4);
        assert_eq!(summary.failed, 1);

        let pdf = original(&db, "docs/a.pdf");
        assert_eq!(pdf.action, Some(Action::Ignore));
        assert_eq!(pdf.base.size, 8);
        assert_eq!(pdf.base.checksum.len(), 64);

        let broken = original(&db, "docs/broken.doc");
        assert_eq!(broken.action, Some(Action::Manual));
        assert_eq!(broken.action_data.manual.unwrap().reason, "IdentifierFailed");

        let unknown = original(&db, "notes.xyz");
        assert_eq!(unknown.action_data.manual.unwrap().reason, "No format identified");

        // Second pass finds nothing new.
        let again = identify_new_files(&ctx, &db, &ByExtension::default(), &catalog, 10).unwrap();
        assert_eq!(again.found, 0);
    }

    #[test]
    fn identify_dry_run_registers_nothing() {
        let (dir, db, catalog) = setup();
        let ctx = CommandContext::new(dir.path(), commands::IDENTIFY).with_dry_run(true);
        let summary = identify_new_files(&ctx, &db, &ByExtension::default(), &catalog, 2).unwrap();
        assert_eq!(summary.registered, 4);
        assert_eq!(db.conn().count_records(RecordKind::Original, "", &[]).unwrap(), 0);
    }

    #[test]
    fn reidentify_skips_locked_and_journals_one_edit() {
        let (dir, db, _) = setup();
        let ctx = CommandContext::new(dir.path(), commands::IDENTIFY);
        identify_new_files(&ctx, &db, &ByExtension::default(), &ActionCatalog::default(), 10)
            .unwrap();

        let mut locked = original(&db, "docs/b.doc");
        locked.lock = true;
        db.conn().update_record(&Record::Original(locked)).unwrap();

        let catalog = ActionCatalog::from_toml_str(CATALOG).unwrap();
        let query = QueryCompiler::new(RecordKind::Original.columns(), "relative_path")
            .parse("@like docs/%")
            .unwrap();
        let ctx = CommandContext::new(dir.path(), commands::REIDENTIFY).with_reason("new catalog");
        let summary =
            reidentify(&ctx, &db, &ByExtension::default(), &catalog, &query, 10).unwrap();

        assert_eq!(summary.matched, 3);
        // a.pdf gets the catalog action; b.doc is locked; broken.doc stays manual.
        assert_eq!(summary.edited, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(original(&db, "docs/a.pdf").action, Some(Action::Ignore));
        assert_eq!(original(&db, "docs/b.doc").action, Some(Action::Manual));
    }
}
