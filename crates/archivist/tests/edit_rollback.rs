use std::fs;
use std::path::Path;

use archivist::edit::remove::{remove_matching, RemoveOptions, RemoveSummary};
use archivist::edit::rename::{rename_matching, ExtensionPolicy};
use archivist::edit::{set_action, set_value, EditSummary, ValueField};
use archivist::journal::{EDIT, SKIP};
use archivist::models::{
    AccessFile, Action, ActionPayload, FileBase, MasterFile, OriginalFile, Record,
    MASTER_PROCESSED_ACCESS,
};
use archivist::rollback::{rollback, rollback_status, ReplayResult, RollbackStatus};
use archivist::{
    commands, rollback_registry, CommandContext, Database, EventFilter, Query, QueryCompiler,
    RecordKind, RecordStore, RunSelector,
};
use tempfile::TempDir;

struct Archive {
    dir: TempDir,
    db: Database,
}

impl Archive {
    fn new() -> Self {
        let dir = TempDir::new().expect("create archive root");
        let db = Database::create(&Database::path_for(dir.path())).expect("create catalog");
        Self { dir, db }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn ctx(&self, command: &str) -> CommandContext {
        CommandContext::new(self.root(), command).with_reason("integration test")
    }

    fn write_file(&self, relative: &str) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, relative.as_bytes()).unwrap();
    }

    fn add_original(&self, relative: &str) -> Record {
        self.write_file(relative);
        let mut file = OriginalFile::new(FileBase::new(relative, "checksum", relative.len() as i64));
        file.base.puid = Some("fmt/40".to_string());
        file.action = Some(Action::Manual);
        let record = Record::Original(file);
        self.db.conn().insert_record(&record).unwrap();
        record
    }

    fn get(&self, record: &Record) -> Option<Record> {
        self.db.conn().record(record.kind(), record.uuid()).unwrap()
    }

    fn count_events(&self, prefix: &str) -> usize {
        self.db
            .events(&EventFilter {
                operation_prefix: Some(prefix.to_string()),
                ..Default::default()
            })
            .unwrap()
            .len()
    }

    fn rollback_last(&self, resume_partial: bool) -> Vec<archivist::rollback::RunReport> {
        let ctx = self.ctx(commands::EDIT_ROLLBACK);
        let registry = rollback_registry();
        ctx.run(&self.db, None, || {
            rollback(&ctx, &self.db, &registry, RunSelector::Index(1), resume_partial)
        })
        .unwrap()
    }
}

fn query(kind: RecordKind, input: &str) -> Query {
    QueryCompiler::new(kind.columns(), "uuid")
        .parse(input)
        .unwrap()
}

fn run_edit(
    archive: &Archive,
    command: &str,
    body: impl FnOnce(&CommandContext) -> archivist::Result<EditSummary>,
) -> EditSummary {
    let ctx = archive.ctx(command);
    ctx.run(&archive.db, None, || body(&ctx)).unwrap()
}

#[test]
fn repeated_edit_journals_once() {
    let archive = Archive::new();
    archive.add_original("docs/report.doc");
    let all = query(RecordKind::Original, "@puid fmt/40");
    let payload = ActionPayload::ignore("duplicate", Some("copy of report.pdf".into()));

    let first = run_edit(&archive, commands::EDIT_ACTION, |ctx| {
        set_action(ctx, &archive.db, &all, &payload)
    });
    let second = run_edit(&archive, commands::EDIT_ACTION, |ctx| {
        set_action(ctx, &archive.db, &all, &payload)
    });

    assert_eq!((first.edited, first.skipped), (1, 0));
    assert_eq!((second.edited, second.skipped), (0, 1));
    let edit_op = format!("{}:{}", commands::EDIT_ACTION, EDIT);
    assert_eq!(archive.count_events(&edit_op), 1);
    // Skips are logged, never journaled.
    assert_eq!(archive.count_events(&format!("{}:{}", commands::EDIT_ACTION, SKIP)), 0);
}

#[test]
fn rollback_restores_fields_and_is_skipped_afterwards() {
    let archive = Archive::new();
    let a = archive.add_original("a.doc");
    let b = archive.add_original("b.doc");
    let all = query(RecordKind::Original, "@puid fmt/40");

    run_edit(&archive, commands::EDIT_ACTION, |ctx| {
        set_action(
            ctx,
            &archive.db,
            &all,
            &ActionPayload::ignore("template", None),
        )
    });
    assert_eq!(
        archive.get(&a).unwrap().as_original().unwrap().action,
        Some(Action::Ignore)
    );

    let reports = archive.rollback_last(false);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].result, ReplayResult::Completed);
    assert_eq!(reports[0].reverted, 2);
    assert_eq!(archive.get(&a), Some(a));
    assert_eq!(archive.get(&b), Some(b));

    // The rollback run itself is never selected; the edit run is now skipped.
    let again = archive.rollback_last(true);
    assert_eq!(again[0].result, ReplayResult::Skipped(RollbackStatus::Full));
}

#[test]
fn rollback_of_rename_moves_file_back() {
    let archive = Archive::new();
    let record = archive.add_original("scans/page");
    let target = query(RecordKind::Original, &format!("@uuid {}", record.uuid()));

    run_edit(&archive, commands::EDIT_RENAME, |ctx| {
        rename_matching(
            ctx,
            &archive.db,
            RecordKind::Original,
            &target,
            "tif",
            ExtensionPolicy::Append,
        )
    });
    assert!(archive.root().join("scans/page.tif").is_file());

    archive.rollback_last(false);
    assert!(archive.root().join("scans/page").is_file());
    assert!(!archive.root().join("scans/page.tif").exists());
    assert_eq!(archive.get(&record).unwrap().relative_path(), "scans/page");
}

#[test]
fn rollback_of_cascade_removal_reregisters_everything() {
    let archive = Archive::new();
    let original = archive.add_original("original/letter.doc");
    let master = Record::Master(MasterFile {
        base: FileBase::new("master/letter.odt", "m", 1),
        original_uuid: original.uuid().clone(),
        processed: MASTER_PROCESSED_ACCESS,
        action_data: Default::default(),
    });
    archive.write_file("master/letter.odt");
    archive.db.conn().insert_record(&master).unwrap();
    let copies: Vec<Record> = ["access/letter.pdf", "access/letter.html"]
        .iter()
        .map(|relative| {
            Record::Access(AccessFile {
                base: FileBase::new(*relative, "a", 1),
                original_uuid: master.uuid().clone(),
            })
        })
        .collect();
    for copy in &copies {
        archive.write_file(copy.relative_path());
        archive.db.conn().insert_record(copy).unwrap();
    }

    let target = query(RecordKind::Original, &format!("@uuid {}", original.uuid()));
    let ctx = archive.ctx(commands::EDIT_REMOVE);
    let summary = ctx
        .run(&archive.db, None, || {
            remove_matching(
                &ctx,
                &archive.db,
                RecordKind::Original,
                &target,
                RemoveOptions::default(),
            )
        })
        .unwrap();
    assert_eq!(summary.removed, 4);
    assert_eq!(
        archive.count_events(&format!("{}:remove", commands::EDIT_REMOVE)),
        4
    );

    let reports = archive.rollback_last(false);
    assert_eq!(reports[0].reverted, 4);
    for record in [&original, &master, &copies[0], &copies[1]] {
        assert_eq!(archive.get(record).as_ref(), Some(record));
    }
}

fn delete_all(archive: &Archive) -> RemoveSummary {
    let all = query(RecordKind::Original, "@puid fmt/40");
    let ctx = archive.ctx(commands::EDIT_REMOVE);
    ctx.run(&archive.db, None, || {
        remove_matching(
            &ctx,
            &archive.db,
            RecordKind::Original,
            &all,
            RemoveOptions {
                delete_files: true,
                ..Default::default()
            },
        )
    })
    .unwrap()
}

#[test]
fn rollback_of_deletion_needs_the_file_back() {
    let archive = Archive::new();
    let restored = archive.add_original("kept/memo.doc");
    let lost = archive.add_original("lost/minutes.doc");

    assert_eq!(delete_all(&archive).removed, 2);
    assert!(!archive.root().join("kept/memo.doc").exists());
    assert_eq!(
        archive.count_events(&format!("{}:delete", commands::EDIT_REMOVE)),
        2
    );

    archive.write_file("kept/memo.doc");
    let reports = archive.rollback_last(false);
    assert_eq!(reports[0].result, ReplayResult::Partial);
    assert_eq!((reports[0].reverted, reports[0].failed), (1, 1));
    assert_eq!(archive.get(&restored).as_ref(), Some(&restored));
    assert_eq!(archive.get(&lost), None);
    assert_eq!(
        archive.count_events(&format!("{}:error", commands::EDIT_ROLLBACK)),
        1
    );
    assert_eq!(
        rollback_status(&archive.db, commands::EDIT_ROLLBACK, &reports[0].run).unwrap(),
        RollbackStatus::Partial
    );
}

#[test]
fn rollback_of_deletion_without_file_writes_no_marker() {
    let archive = Archive::new();
    let lost = archive.add_original("scans/only.tif");
    delete_all(&archive);

    let reports = archive.rollback_last(false);
    assert_eq!(reports[0].result, ReplayResult::Failed);
    assert_eq!((reports[0].reverted, reports[0].failed), (0, 1));
    assert_eq!(archive.get(&lost), None);
    assert_eq!(
        rollback_status(&archive.db, commands::EDIT_ROLLBACK, &reports[0].run).unwrap(),
        RollbackStatus::None
    );
}

#[test]
fn partial_rollback_resumes_without_reverting_twice() {
    let archive = Archive::new();
    let records: Vec<Record> = (1..=5)
        .map(|n| archive.add_original(&format!("file{}.doc", n)))
        .collect();
    let all = query(RecordKind::Original, "@puid fmt/40");

    run_edit(&archive, commands::EDIT_VALUE, |ctx| {
        set_value(
            ctx,
            &archive.db,
            RecordKind::Original,
            &all,
            ValueField::Warning,
            Some("checked"),
        )
    });

    // Two records vanish behind the journal's back, so their inverse fails.
    let hidden: Vec<Record> = records[3..]
        .iter()
        .map(|record| archive.get(record).unwrap())
        .collect();
    for record in &hidden {
        archive.db.conn().delete_record(record).unwrap();
    }

    let first = archive.rollback_last(false);
    assert_eq!(first[0].result, ReplayResult::Partial);
    assert_eq!((first[0].reverted, first[0].failed), (3, 2));
    let rollback_edits = format!("{}:{}", commands::EDIT_ROLLBACK, EDIT);
    assert_eq!(archive.count_events(&rollback_edits), 3);

    // Without resume the partly rolled back run is left alone.
    let skipped = archive.rollback_last(false);
    assert_eq!(
        skipped[0].result,
        ReplayResult::Skipped(RollbackStatus::Partial)
    );

    for record in &hidden {
        archive.db.conn().insert_record(record).unwrap();
    }
    let resumed = archive.rollback_last(true);
    assert_eq!(resumed[0].result, ReplayResult::Completed);
    // The three reverted records are already at their old value: no new edits.
    assert_eq!(archive.count_events(&rollback_edits), 5);
    for record in &records {
        let current = archive.get(record).unwrap();
        assert_eq!(current.base().warning, None);
    }
}
