//! Removing records, their derived records and optionally their files.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use archivist_ids::RecordId;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{edit_record, missing_subject, patch_of, select_matching};
use crate::context::{commands, CommandContext};
use crate::database::{Database, RecordStore};
use crate::error::{Error, Result};
use crate::journal::{log_event, DELETE, EDIT, NEW, REMOVE, SKIP};
use crate::models::{
    Event, Record, RecordKind, MASTER_PROCESSED_ACCESS, MASTER_PROCESSED_STATUTORY,
};
use crate::query::Query;
use crate::rollback::RollbackRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Also delete files from disk, and directories left empty.
    pub delete_files: bool,
    /// Clear the processed state of the record each removed one came from.
    pub reset_processed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveSummary {
    pub matched: usize,
    pub removed: usize,
}

/// Remove matching records of `kind` and everything derived from them.
pub fn remove_matching(
    ctx: &CommandContext,
    db: &Database,
    kind: RecordKind,
    query: &Query,
    options: RemoveOptions,
) -> Result<RemoveSummary> {
    let records = select_matching(db, kind, query)?;
    let mut summary = RemoveSummary {
        matched: records.len(),
        ..Default::default()
    };
    let mut removed: HashSet<RecordId> = HashSet::new();

    for record in records {
        ctx.check_interrupt()?;
        if removed.contains(record.uuid()) {
            debug!(uuid = %record.uuid(), "Already removed with its parent");
            continue;
        }

        for target in removal_order(db, &record)? {
            if removed.contains(target.uuid()) {
                continue;
            }
            remove_record(ctx, db, &target, options.delete_files)?;
            removed.insert(target.uuid().clone());
            summary.removed += 1;
        }

        if options.reset_processed {
            reset_parent(ctx, db, &record, &removed)?;
        }
    }

    Ok(summary)
}

/// `record` and the records derived from it, children before parents.
fn removal_order(db: &Database, record: &Record) -> Result<Vec<Record>> {
    let mut order = Vec::new();
    match record {
        Record::Original(file) => {
            for master in db.conn().derived_records(RecordKind::Master, &file.base.uuid)? {
                order.extend(removal_order(db, &master)?);
            }
        }
        Record::Master(file) => {
            order.extend(db.conn().derived_records(RecordKind::Access, &file.base.uuid)?);
            order.extend(
                db.conn()
                    .derived_records(RecordKind::Statutory, &file.base.uuid)?,
            );
        }
        Record::Access(_) | Record::Statutory(_) => {}
    }
    order.push(record.clone());
    Ok(order)
}

fn remove_record(
    ctx: &CommandContext,
    db: &Database,
    record: &Record,
    delete_file: bool,
) -> Result<()> {
    let verb = if delete_file { DELETE } else { REMOVE };
    let event = ctx
        .event(verb)
        .with_record(record)
        .with_data(serde_json::to_value(record)?);

    if !ctx.dry_run {
        let path = record.base().path(ctx.root());
        db.transaction(|tx| {
            tx.delete_record(record)?;
            db.append_event(tx, event.clone())?;
            if delete_file {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        warn!(path = %path.display(), "File already missing");
                    }
                    Err(e) => return Err(Error::io(&path, e)),
                }
            }
            Ok(())
        })?;
        if delete_file {
            if let Some(parent) = path.parent() {
                remove_empty_dirs(ctx.root(), parent)?;
            }
        }
    }

    log_event(&event, Some(record));
    Ok(())
}

/// Remove `start` and its ancestors while they are empty, stopping at `root`.
pub fn remove_empty_dirs(root: &Path, start: &Path) -> Result<()> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        let mut entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                current = dir.parent();
                continue;
            }
            Err(e) => return Err(Error::io(dir, e)),
        };
        if entries.next().is_some() {
            break;
        }
        fs::remove_dir(dir).map_err(|e| Error::io(dir, e))?;
        debug!(path = %dir.display(), "Removed empty directory");
        current = dir.parent();
    }
    Ok(())
}

fn reset_parent(
    ctx: &CommandContext,
    db: &Database,
    record: &Record,
    removed: &HashSet<RecordId>,
) -> Result<()> {
    let Some((parent_kind, parent_uuid)) = record.derived_from() else {
        return Ok(());
    };
    if removed.contains(parent_uuid) {
        return Ok(());
    }
    let Some(parent) = db.conn().record(parent_kind, parent_uuid)? else {
        return Ok(());
    };

    let value = match (&parent, record.kind()) {
        (Record::Original(_), _) => Value::Bool(false),
        (Record::Master(master), RecordKind::Access) => {
            json!(master.processed & !MASTER_PROCESSED_ACCESS)
        }
        (Record::Master(master), RecordKind::Statutory) => {
            json!(master.processed & !MASTER_PROCESSED_STATUTORY)
        }
        _ => return Ok(()),
    };
    edit_record(ctx, db, &parent, patch_of("processed", value))?;
    Ok(())
}

/// Inverse of a removal or deletion: register the record again if its file exists.
pub fn rollback_remove(
    ctx: &CommandContext,
    db: &Database,
    event: &Event,
    current: Option<Record>,
) -> Result<()> {
    let data = event
        .data
        .clone()
        .ok_or_else(|| Error::corrupt_event(event.time, "removal without record data"))?;
    let record: Record = serde_json::from_value(data)
        .map_err(|e| Error::corrupt_event(event.time, format!("bad record data: {}", e)))?;

    if current.is_some() {
        log_event(
            &ctx.event(SKIP).with_record(&record).with_data(json!("already registered")),
            Some(&record),
        );
        return Ok(());
    }

    let path = record.base().path(ctx.root());
    if !path.is_file() {
        return Err(Error::MissingFile(path));
    }

    let restored = ctx.event(NEW).with_record(&record);
    if !ctx.dry_run {
        db.transaction(|tx| {
            tx.insert_record(&record)?;
            db.append_event(tx, restored.clone())?;
            Ok(())
        })?;
    }
    log_event(&restored, Some(&record));
    Ok(())
}

/// Inverse of registering a new record: remove the record again.
pub fn rollback_new(
    ctx: &CommandContext,
    db: &Database,
    event: &Event,
    current: Option<Record>,
) -> Result<()> {
    let Some(record) = current else {
        if event.subject().is_none() {
            return Err(missing_subject(event));
        }
        debug!(time = %event.time, "Record already gone");
        return Ok(());
    };
    remove_record(ctx, db, &record, false)
}

pub fn register_rollback(registry: &mut RollbackRegistry) {
    // A deleted file that was put back is registered again; otherwise the inverse fails.
    for verb in [REMOVE, DELETE] {
        registry.register(format!("{}:{}", commands::EDIT_REMOVE, verb), rollback_remove);
    }
    registry.register(
        format!("{}:{}", commands::EDIT_REMOVE, EDIT),
        super::rollback_edit,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::EventFilter;
    use crate::models::{AccessFile, FileBase, MasterFile, OriginalFile};
    use crate::query::QueryCompiler;
    use tempfile::TempDir;

    struct Tree {
        original: OriginalFile,
        master: MasterFile,
        access: Vec<AccessFile>,
    }

    fn write(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn tree(db: &Database, root: &Path) -> Tree {
        let original = OriginalFile {
            processed: true,
            ..OriginalFile::new(FileBase::new("original/doc.wpd", "o", 1))
        };
        let master = MasterFile {
            base: FileBase::new("master/doc/doc.odt", "m", 1),
            original_uuid: original.base.uuid.clone(),
            processed: MASTER_PROCESSED_ACCESS,
            action_data: Default::default(),
        };
        let access: Vec<AccessFile> = ["access/doc/doc.pdf", "access/doc/doc.html"]
            .iter()
            .map(|path| AccessFile {
                base: FileBase::new(*path, "a", 1),
                original_uuid: master.base.uuid.clone(),
            })
            .collect();

        let records: Vec<Record> = std::iter::once(Record::from(original.clone()))
            .chain(std::iter::once(Record::from(master.clone())))
            .chain(access.iter().cloned().map(Record::from))
            .collect();
        for record in &records {
            write(root, record.relative_path());
            db.conn().insert_record(record).unwrap();
        }
        Tree {
            original,
            master,
            access,
        }
    }

    fn query(kind: RecordKind, uuid: &RecordId) -> Query {
        QueryCompiler::new(kind.columns(), "uuid")
            .parse(uuid.as_str())
            .unwrap()
    }

    fn count_all(db: &Database) -> u64 {
        RecordKind::ALL
            .iter()
            .map(|kind| db.conn().count_records(*kind, "", &[]).unwrap())
            .sum()
    }

    #[test]
    fn removing_an_original_cascades_and_deletes_files() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_memory().unwrap();
        let tree = tree(&db, tmp.path());
        let ctx = CommandContext::new(tmp.path(), commands::EDIT_REMOVE);

        let summary = remove_matching(
            &ctx,
            &db,
            RecordKind::Original,
            &query(RecordKind::Original, &tree.original.base.uuid),
            RemoveOptions {
                delete_files: true,
                reset_processed: false,
            },
        )
        .unwrap();

        assert_eq!(summary.removed, 4);
        assert_eq!(count_all(&db), 0);
        for dir in ["original", "master", "access"] {
            assert!(!tmp.path().join(dir).exists(), "{} left behind", dir);
        }
        assert!(tmp.path().exists());

        let events = db.events(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.verb() == DELETE));
        // Children are journaled before their parents.
        assert_eq!(events[3].file_uuid.as_ref(), Some(&tree.original.base.uuid));
        assert_eq!(events[2].file_uuid.as_ref(), Some(&tree.master.base.uuid));
    }

    #[test]
    fn removing_an_access_copy_resets_master_bit() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_memory().unwrap();
        let tree = tree(&db, tmp.path());
        let ctx = CommandContext::new(tmp.path(), commands::EDIT_REMOVE);

        remove_matching(
            &ctx,
            &db,
            RecordKind::Access,
            &query(RecordKind::Access, &tree.access[0].base.uuid),
            RemoveOptions {
                delete_files: false,
                reset_processed: true,
            },
        )
        .unwrap();

        let master = db
            .conn()
            .record(RecordKind::Master, &tree.master.base.uuid)
            .unwrap()
            .unwrap();
        assert_eq!(master.as_master().unwrap().processed, 0);
        assert!(tmp.path().join(tree.access[0].base.relative_path.as_str()).is_file());
    }

    #[test]
    fn removal_rollback_reinserts_records_with_files() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_memory().unwrap();
        let tree = tree(&db, tmp.path());
        let ctx = CommandContext::new(tmp.path(), commands::EDIT_REMOVE);
        remove_matching(
            &ctx,
            &db,
            RecordKind::Master,
            &query(RecordKind::Master, &tree.master.base.uuid),
            RemoveOptions::default(),
        )
        .unwrap();
        assert_eq!(count_all(&db), 1);

        let rollback_ctx = CommandContext::new(tmp.path(), commands::EDIT_ROLLBACK);
        let mut events = db.events(&EventFilter::default()).unwrap();
        events.reverse();
        for event in &events {
            let (kind, uuid) = event.subject().unwrap();
            let current = db.conn().record(kind, uuid).unwrap();
            rollback_remove(&rollback_ctx, &db, event, current).unwrap();
        }
        assert_eq!(count_all(&db), 4);
    }

    #[test]
    fn removal_rollback_fails_when_file_is_gone() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_memory().unwrap();
        let tree = tree(&db, tmp.path());
        let ctx = CommandContext::new(tmp.path(), commands::EDIT_REMOVE);
        remove_matching(
            &ctx,
            &db,
            RecordKind::Access,
            &query(RecordKind::Access, &tree.access[1].base.uuid),
            RemoveOptions::default(),
        )
        .unwrap();
        fs::remove_file(tmp.path().join(tree.access[1].base.relative_path.as_str())).unwrap();

        let event = db.events(&EventFilter::default()).unwrap().remove(0);
        let rollback_ctx = CommandContext::new(tmp.path(), commands::EDIT_ROLLBACK);
        let err = rollback_remove(&rollback_ctx, &db, &event, None).unwrap_err();
        assert!(matches!(err, Error::MissingFile(_)));
    }

    #[test]
    fn empty_directory_walk_stops_at_non_empty_parent() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/keep.txt"), b"x").unwrap();

        remove_empty_dirs(root, &root.join("a/b/c")).unwrap();
        assert!(!root.join("a/b").exists());
        assert!(root.join("a").is_dir());
    }
}
