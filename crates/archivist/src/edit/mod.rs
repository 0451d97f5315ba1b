//! Query-driven, journaled edits of catalog records.
//!
//! Every edit follows the same protocol per matched record: compute the new
//! field values, skip when nothing changes, otherwise update the record and
//! journal `[old, new]` in one store transaction. Dry runs only log.

pub mod remove;
pub mod rename;

use archivist_db::Select;
use serde_json::{json, Value};

use crate::context::{commands, CommandContext};
use crate::database::{Database, RecordStore, PATH_ORDER};
use crate::error::{Error, Result};
use crate::journal::{log_event, EDIT, SKIP};
use crate::models::{
    Action, ActionData, ActionPayload, Event, Patch, Record, RecordKind,
    MASTER_PROCESSED_ACCESS, MASTER_PROCESSED_STATUTORY,
};
use crate::query::Query;
use crate::rollback::RollbackRegistry;

/// What an edit wants to do with one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Set these fields.
    Set(Patch),
    /// Leave the record alone; the text is logged.
    Skip(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditSummary {
    pub matched: usize,
    pub edited: usize,
    pub skipped: usize,
}

/// Records of `kind` matching `query`, in case-insensitive path order.
pub fn select_matching(db: &Database, kind: RecordKind, query: &Query) -> Result<Vec<Record>> {
    let (clause, params) = query.to_where();
    let select = Select::new().filter(clause, params).order_by(PATH_ORDER);
    db.conn().records(kind, &select)
}

/// Apply `change` to every record of `kind` matching `query`.
pub fn edit_matching(
    ctx: &CommandContext,
    db: &Database,
    kind: RecordKind,
    query: &Query,
    change: impl FnMut(&Record) -> Result<Change>,
) -> Result<EditSummary> {
    let records = select_matching(db, kind, query)?;
    apply_edits(ctx, db, records, change)
}

/// Apply `change` to each of `records` in order.
pub fn apply_edits(
    ctx: &CommandContext,
    db: &Database,
    records: Vec<Record>,
    mut change: impl FnMut(&Record) -> Result<Change>,
) -> Result<EditSummary> {
    let mut summary = EditSummary {
        matched: records.len(),
        ..Default::default()
    };
    for record in records {
        ctx.check_interrupt()?;
        match change(&record)? {
            Change::Skip(why) => {
                let event = ctx
                    .event(SKIP)
                    .with_record(&record)
                    .with_data(Value::String(why));
                log_event(&event, Some(&record));
                summary.skipped += 1;
            }
            Change::Set(patch) => match edit_record(ctx, db, &record, patch)? {
                Some(_) => summary.edited += 1,
                None => summary.skipped += 1,
            },
        }
    }
    Ok(summary)
}

/// Set `patch` on `record` and journal the change.
///
/// Returns the updated record, or `None` when every field already has the
/// requested value.
pub fn edit_record(
    ctx: &CommandContext,
    db: &Database,
    record: &Record,
    patch: Patch,
) -> Result<Option<Record>> {
    let old = record.snapshot(patch.keys())?;
    let updated = record.patched(&patch)?;
    let new = updated.snapshot(patch.keys())?;
    let data = json!([Value::Object(old.clone()), Value::Object(new.clone())]);

    if old == new {
        log_event(&ctx.event(SKIP).with_record(record).with_data(data), Some(record));
        return Ok(None);
    }

    let event = ctx.event(EDIT).with_record(record).with_data(data);
    if !ctx.dry_run {
        db.transaction(|tx| {
            tx.update_record(&updated)?;
            db.append_event(tx, event.clone())?;
            Ok(())
        })?;
    }
    log_event(&event, Some(&updated));
    Ok(Some(updated))
}

/// Patch with a single field.
pub fn patch_of(field: &str, value: Value) -> Patch {
    let mut patch = Patch::new();
    patch.insert(field.to_string(), value);
    patch
}

fn action_patch(action: Action, data: &ActionData) -> Result<Patch> {
    let mut patch = patch_of("action", Value::String(action.as_str().to_string()));
    patch.insert("action_data".to_string(), serde_json::to_value(data)?);
    Ok(patch)
}

/// Assign `payload` to matching originals, keeping other actions' settings.
pub fn set_action(
    ctx: &CommandContext,
    db: &Database,
    query: &Query,
    payload: &ActionPayload,
) -> Result<EditSummary> {
    edit_matching(ctx, db, RecordKind::Original, query, |record| {
        action_change(record, payload)
    })
}

/// Change assigning `payload` to an original.
pub fn action_change(record: &Record, payload: &ActionPayload) -> Result<Change> {
    let Some(file) = record.as_original() else {
        return Ok(Change::Skip(format!("{} files have no action", record.kind())));
    };
    let data = payload.merged_into(&file.action_data);
    Ok(Change::Set(action_patch(payload.action(), &data)?))
}

/// Replace action and all action data of matching originals.
///
/// `data` must carry the payload for `action`.
pub fn set_action_data(
    ctx: &CommandContext,
    db: &Database,
    query: &Query,
    action: Action,
    data: &ActionData,
) -> Result<EditSummary> {
    validate_action_data(action, data)?;
    let patch = action_patch(action, data)?;
    edit_matching(ctx, db, RecordKind::Original, query, |_| {
        Ok(Change::Set(patch.clone()))
    })
}

/// Check that `data` has the payload `action` needs.
pub fn validate_action_data(action: Action, data: &ActionData) -> Result<()> {
    let present = match action {
        Action::Convert => data.convert.is_some(),
        Action::Extract => data.extract.is_some(),
        Action::Manual => data.manual.is_some(),
        Action::Ignore => data.ignore.is_some(),
    };
    if present {
        Ok(())
    } else {
        Err(Error::invalid_value(
            "action_data",
            format!("no {} settings for action {}", action, action),
        ))
    }
}

/// Lock or unlock matching originals against automated changes.
pub fn set_lock(
    ctx: &CommandContext,
    db: &Database,
    query: &Query,
    lock: bool,
) -> Result<EditSummary> {
    edit_matching(ctx, db, RecordKind::Original, query, |_| {
        Ok(Change::Set(patch_of("lock", Value::Bool(lock))))
    })
}

/// New value for a `processed` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Originals: processed or not.
    Flag(bool),
    /// Masters: bitmask of produced copies.
    Mask(u8),
}

impl Processed {
    fn value_for(&self, kind: RecordKind) -> Result<Value> {
        match (kind, self) {
            (RecordKind::Original, Processed::Flag(flag)) => Ok(Value::Bool(*flag)),
            (RecordKind::Master, Processed::Mask(mask))
                if *mask <= MASTER_PROCESSED_ACCESS | MASTER_PROCESSED_STATUTORY =>
            {
                Ok(json!(mask))
            }
            (RecordKind::Master, Processed::Flag(flag)) => Ok(json!(if *flag {
                MASTER_PROCESSED_ACCESS | MASTER_PROCESSED_STATUTORY
            } else {
                0
            })),
            (RecordKind::Master, Processed::Mask(mask)) => Err(Error::invalid_value(
                "processed",
                format!("mask {} has unknown bits", mask),
            )),
            (kind, _) => Err(Error::invalid_value(
                "processed",
                format!("{} files have no processed state", kind),
            )),
        }
    }
}

/// Set the processed state of matching originals or masters.
pub fn set_processed(
    ctx: &CommandContext,
    db: &Database,
    kind: RecordKind,
    query: &Query,
    processed: Processed,
) -> Result<EditSummary> {
    let value = processed.value_for(kind)?;
    edit_matching(ctx, db, kind, query, |_| {
        Ok(Change::Set(patch_of("processed", value.clone())))
    })
}

/// Identification fields that can be set by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueField {
    Puid,
    Signature,
    Warning,
}

impl ValueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueField::Puid => "puid",
            ValueField::Signature => "signature",
            ValueField::Warning => "warning",
        }
    }
}

/// Set (or clear with `None`) an identification field.
pub fn set_value(
    ctx: &CommandContext,
    db: &Database,
    kind: RecordKind,
    query: &Query,
    field: ValueField,
    value: Option<&str>,
) -> Result<EditSummary> {
    let value = match value {
        Some(text) if !text.trim().is_empty() => Value::String(text.to_string()),
        _ => Value::Null,
    };
    edit_matching(ctx, db, kind, query, |_| {
        Ok(Change::Set(patch_of(field.as_str(), value.clone())))
    })
}

/// Inverse of any `[old, new]` field edit: write `old` back.
pub fn rollback_edit(
    ctx: &CommandContext,
    db: &Database,
    event: &Event,
    record: Option<Record>,
) -> Result<()> {
    let record = record.ok_or_else(|| missing_subject(event))?;
    let (old, _) = event.edit_patches()?;
    edit_record(ctx, db, &record, old)?;
    Ok(())
}

pub(crate) fn missing_subject(event: &Event) -> Error {
    match event.subject() {
        Some((kind, uuid)) => Error::RecordNotFound {
            kind: kind.to_string(),
            uuid: uuid.to_string(),
        },
        None => Error::corrupt_event(event.time, "event has no subject"),
    }
}

pub fn register_rollback(registry: &mut RollbackRegistry) {
    for command in [
        commands::EDIT_ACTION,
        commands::EDIT_LOCK,
        commands::EDIT_PROCESSED,
        commands::EDIT_VALUE,
    ] {
        registry.register(format!("{}:{}", command, EDIT), rollback_edit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::EventFilter;
    use crate::models::{FileBase, OriginalFile};
    use crate::query::QueryCompiler;
    use archivist_db::{OnConflict, TableExt};

    fn setup(paths: &[&str]) -> (Database, Vec<OriginalFile>) {
        let db = Database::open_memory().unwrap();
        let files: Vec<OriginalFile> = paths
            .iter()
            .map(|path| OriginalFile::new(FileBase::new(*path, "00", 1)))
            .collect();
        for file in &files {
            db.conn().insert(file, OnConflict::Abort).unwrap();
        }
        (db, files)
    }

    fn query(text: &str) -> Query {
        QueryCompiler::new(RecordKind::Original.columns(), "uuid")
            .parse(text)
            .unwrap()
    }

    fn edits(db: &Database) -> Vec<Event> {
        db.events(&EventFilter::default())
            .unwrap()
            .into_iter()
            .filter(|e| e.verb() == EDIT)
            .collect()
    }

    #[test]
    fn same_action_twice_journals_once() {
        let (db, files) = setup(&["a.txt"]);
        let ctx = CommandContext::new("/archive", commands::EDIT_ACTION).with_reason("test");
        let payload = ActionPayload::manual("broken", "look at it");
        let q = query(files[0].base.uuid.as_str());

        let first = set_action(&ctx, &db, &q, &payload).unwrap();
        let second = set_action(&ctx, &db, &q, &payload).unwrap();

        assert_eq!((first.edited, first.skipped), (1, 0));
        assert_eq!((second.edited, second.skipped), (0, 1));
        assert_eq!(edits(&db).len(), 1);
    }

    #[test]
    fn changed_payload_with_same_action_is_an_edit() {
        let (db, files) = setup(&["a.txt"]);
        let ctx = CommandContext::new("/archive", commands::EDIT_ACTION);
        let q = query(files[0].base.uuid.as_str());

        set_action(&ctx, &db, &q, &ActionPayload::manual("one", "p")).unwrap();
        let summary = set_action(&ctx, &db, &q, &ActionPayload::manual("two", "p")).unwrap();
        assert_eq!(summary.edited, 1);
    }

    #[test]
    fn edit_event_carries_old_and_new() {
        let (db, files) = setup(&["a.txt"]);
        let ctx = CommandContext::new("/archive", commands::EDIT_LOCK).with_reason("hold");
        set_lock(&ctx, &db, &query(files[0].base.uuid.as_str()), true).unwrap();

        let events = edits(&db);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].operation, "archivist.edit.lock:edit");
        assert_eq!(events[0].reason.as_deref(), Some("hold"));
        assert_eq!(events[0].data, Some(json!([{"lock": false}, {"lock": true}])));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (db, files) = setup(&["a.txt"]);
        let ctx = CommandContext::new("/archive", commands::EDIT_LOCK).with_dry_run(true);
        let summary = set_lock(&ctx, &db, &query(files[0].base.uuid.as_str()), true).unwrap();

        assert_eq!(summary.edited, 1);
        assert!(edits(&db).is_empty());
        let stored = db
            .conn()
            .record(RecordKind::Original, &files[0].base.uuid)
            .unwrap()
            .unwrap();
        assert!(!stored.as_original().unwrap().lock);
    }

    #[test]
    fn matches_are_processed_in_case_insensitive_path_order() {
        let (db, _) = setup(&["b.txt", "A.txt", "c.txt"]);
        let records =
            select_matching(&db, RecordKind::Original, &query("@lock @false")).unwrap();
        let paths: Vec<&str> = records.iter().map(Record::relative_path).collect();
        assert_eq!(paths, vec!["A.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn processed_values_depend_on_kind() {
        assert_eq!(
            Processed::Flag(true).value_for(RecordKind::Original).unwrap(),
            json!(true)
        );
        assert_eq!(
            Processed::Mask(2).value_for(RecordKind::Master).unwrap(),
            json!(2)
        );
        assert!(Processed::Mask(8).value_for(RecordKind::Master).is_err());
        assert!(Processed::Flag(true).value_for(RecordKind::Access).is_err());
    }

    #[test]
    fn rollback_edit_restores_old_value_and_is_idempotent() {
        let (db, files) = setup(&["a.txt"]);
        let ctx = CommandContext::new("/archive", commands::EDIT_VALUE);
        set_value(
            &ctx,
            &db,
            RecordKind::Original,
            &query(files[0].base.uuid.as_str()),
            ValueField::Puid,
            Some("fmt/18"),
        )
        .unwrap();
        let event = edits(&db).remove(0);

        let rollback_ctx = CommandContext::new("/archive", commands::EDIT_ROLLBACK);
        for _ in 0..2 {
            let current = db
                .conn()
                .record(RecordKind::Original, &files[0].base.uuid)
                .unwrap();
            rollback_edit(&rollback_ctx, &db, &event, current).unwrap();
        }

        let restored = db
            .conn()
            .record(RecordKind::Original, &files[0].base.uuid)
            .unwrap()
            .unwrap();
        assert_eq!(restored.base().puid, None);
        let rollback_edits = edits(&db)
            .into_iter()
            .filter(|e| e.command() == commands::EDIT_ROLLBACK)
            .count();
        assert_eq!(rollback_edits, 1);
    }

    #[test]
    fn copy_requires_payload_for_action() {
        let err = validate_action_data(Action::Convert, &ActionData::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }
}
