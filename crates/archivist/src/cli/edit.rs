//! `archivist edit`: query-driven, journaled changes to catalog records.

use std::path::PathBuf;

use anyhow::Result;
use archivist::commands;
use archivist::edit::remove::{remove_matching, RemoveOptions};
use archivist::edit::rename::{rename_matching, ExtensionPolicy};
use archivist::edit::{
    set_action, set_action_data, set_lock, set_processed, set_value, EditSummary, Processed,
    ValueField,
};
use archivist::models::{
    Action, ActionPayload, ConvertAction, ExtractAction, IgnoreAction, ManualAction,
};
use archivist::rollback::{rollback, ReplayResult, RollbackStatus};
use archivist::{rollback_registry, CommandContext, RecordKind, RunSelector};
use clap::{Args, Subcommand, ValueEnum};
use serde_json::json;

use super::error::HelpfulError;
use super::{compile_query, config, journaled, parse_kind, report, require_reason, Session};

/// Arguments shared by every edit command.
#[derive(Args, Debug, Clone)]
pub struct EditTarget {
    /// Query selecting the records to edit
    pub query: String,

    /// Why the change is made (stored in the journal)
    pub reason: String,

    /// Show what would change without changing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum EditCommand {
    /// Set the processing action of original files
    Action {
        #[command(subcommand)]
        action: ActionCommand,
    },

    /// Change the extension of files on disk and in the catalog
    Rename {
        /// New extension, e.g. ".pdf"
        extension: String,

        #[command(flatten)]
        target: EditTarget,

        #[arg(long, default_value = "original", value_parser = parse_kind)]
        kind: RecordKind,

        #[arg(long, value_enum, default_value_t = RenamePolicy::Append)]
        policy: RenamePolicy,
    },

    /// Lock original files against automated changes
    Lock {
        #[command(flatten)]
        target: EditTarget,

        /// Unlock instead
        #[arg(long)]
        unlock: bool,
    },

    /// Set the processed state of original or master files
    Processed {
        #[command(flatten)]
        target: EditTarget,

        #[arg(long, default_value = "original", value_parser = parse_kind)]
        kind: RecordKind,

        /// Mark as not processed
        #[arg(long, conflicts_with = "mask")]
        unset: bool,

        /// Master files: bitmask of produced copies (1 access, 2 statutory)
        #[arg(long)]
        mask: Option<u8>,
    },

    /// Set or clear an identification field
    Value {
        #[arg(value_enum)]
        field: ValueName,

        #[command(flatten)]
        target: EditTarget,

        #[arg(long, default_value = "original", value_parser = parse_kind)]
        kind: RecordKind,

        /// New value; omit to clear the field
        #[arg(long)]
        value: Option<String>,
    },

    /// Remove records, their derived records and optionally their files
    Remove {
        #[command(flatten)]
        target: EditTarget,

        #[arg(long, default_value = "original", value_parser = parse_kind)]
        kind: RecordKind,

        /// Also delete the files from disk (cannot be rolled back)
        #[arg(long)]
        delete: bool,

        /// Clear the processed state of the parent records
        #[arg(long)]
        reset_processed: bool,
    },

    /// Roll back earlier command runs
    Rollback {
        /// Runs to roll back: 1 is the last run, 2-4 a range, or a time
        selector: String,

        /// Why the runs are rolled back
        reason: String,

        /// Also retry runs that were only partly rolled back
        #[arg(long)]
        resume_partial: bool,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ActionCommand {
    /// Convert with a tool to an output format
    Convert {
        #[command(flatten)]
        target: EditTarget,

        #[arg(long)]
        tool: String,

        #[arg(long)]
        output: String,
    },

    /// Unpack as an archive
    Extract {
        #[command(flatten)]
        target: EditTarget,

        #[arg(long)]
        tool: String,

        /// Extension the archive should carry
        #[arg(long)]
        extension: Option<String>,
    },

    /// Needs manual processing; REASON is stored as the manual reason
    Manual {
        #[command(flatten)]
        target: EditTarget,

        /// What has to be done by hand
        #[arg(long)]
        process: String,
    },

    /// Do not process; REASON is stored as the ignore reason
    Ignore {
        #[command(flatten)]
        target: EditTarget,

        /// Placeholder template used instead of the file
        #[arg(long)]
        template: String,
    },

    /// Copy an action and its settings from the action catalog entry of a format
    Copy {
        #[command(flatten)]
        target: EditTarget,

        /// Format code whose catalog entry is copied
        #[arg(long)]
        puid: String,

        /// Action to copy; defaults to the entry's action
        #[arg(long)]
        action: Option<String>,

        #[arg(long, env = "ARCHIVIST_ACTIONS")]
        actions: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenamePolicy {
    Append,
    ReplaceLast,
    ReplaceAll,
}

impl From<RenamePolicy> for ExtensionPolicy {
    fn from(policy: RenamePolicy) -> Self {
        match policy {
            RenamePolicy::Append => ExtensionPolicy::Append,
            RenamePolicy::ReplaceLast => ExtensionPolicy::ReplaceLast,
            RenamePolicy::ReplaceAll => ExtensionPolicy::ReplaceAll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ValueName {
    Puid,
    Signature,
    Warning,
}

impl From<ValueName> for ValueField {
    fn from(name: ValueName) -> Self {
        match name {
            ValueName::Puid => ValueField::Puid,
            ValueName::Signature => ValueField::Signature,
            ValueName::Warning => ValueField::Warning,
        }
    }
}

impl EditCommand {
    pub fn dry_run(&self) -> bool {
        match self {
            EditCommand::Action { action } => action.target().dry_run,
            EditCommand::Rename { target, .. }
            | EditCommand::Lock { target, .. }
            | EditCommand::Processed { target, .. }
            | EditCommand::Value { target, .. }
            | EditCommand::Remove { target, .. } => target.dry_run,
            EditCommand::Rollback { dry_run, .. } => *dry_run,
        }
    }
}

impl ActionCommand {
    fn target(&self) -> &EditTarget {
        match self {
            ActionCommand::Convert { target, .. }
            | ActionCommand::Extract { target, .. }
            | ActionCommand::Manual { target, .. }
            | ActionCommand::Ignore { target, .. }
            | ActionCommand::Copy { target, .. } => target,
        }
    }
}

pub fn run(session: &Session, command: EditCommand) -> Result<()> {
    match command {
        EditCommand::Action { action } => run_action(session, action),
        EditCommand::Rename {
            extension,
            target,
            kind,
            policy,
        } => {
            let data = json!({ "query": target.query, "extension": extension, "kind": kind });
            edit(session, commands::EDIT_RENAME, kind, &target, data, |ctx, db, query| {
                rename_matching(ctx, db, kind, query, &extension, policy.into())
            })
        }
        EditCommand::Lock { target, unlock } => {
            let data = json!({ "query": target.query, "lock": !unlock });
            edit(
                session,
                commands::EDIT_LOCK,
                RecordKind::Original,
                &target,
                data,
                |ctx, db, query| set_lock(ctx, db, query, !unlock),
            )
        }
        EditCommand::Processed {
            target,
            kind,
            unset,
            mask,
        } => {
            let processed = match mask {
                Some(mask) => Processed::Mask(mask),
                None => Processed::Flag(!unset),
            };
            let data = json!({ "query": target.query, "kind": kind, "unset": unset, "mask": mask });
            edit(session, commands::EDIT_PROCESSED, kind, &target, data, |ctx, db, query| {
                set_processed(ctx, db, kind, query, processed)
            })
        }
        EditCommand::Value {
            field,
            target,
            kind,
            value,
        } => {
            let field = ValueField::from(field);
            let data = json!({
                "query": target.query,
                "kind": kind,
                "field": field.as_str(),
                "value": value,
            });
            edit(session, commands::EDIT_VALUE, kind, &target, data, |ctx, db, query| {
                set_value(ctx, db, kind, query, field, value.as_deref())
            })
        }
        EditCommand::Remove {
            target,
            kind,
            delete,
            reset_processed,
        } => run_remove(session, target, kind, delete, reset_processed),
        EditCommand::Rollback {
            selector,
            reason,
            resume_partial,
            dry_run,
        } => run_rollback(session, &selector, &reason, resume_partial, dry_run),
    }
}

/// Validate, open, run `body` as one journaled run and print the summary.
fn edit(
    session: &Session,
    command: &str,
    kind: RecordKind,
    target: &EditTarget,
    data: serde_json::Value,
    body: impl FnOnce(
        &CommandContext,
        &archivist::Database,
        &archivist::Query,
    ) -> archivist::Result<EditSummary>,
) -> Result<()> {
    let reason = require_reason(&target.reason)?;
    let query = compile_query(kind, &target.query)?;
    let db = session.open()?;
    let ctx = session.context(command, Some(reason), target.dry_run);

    let summary = journaled(&ctx, &db, data, || body(&ctx, &db, &query))?;
    report(
        &ctx,
        format!(
            "Matched {} {} records: {} edited, {} unchanged",
            summary.matched, kind, summary.edited, summary.skipped
        ),
    );
    Ok(())
}

fn run_action(session: &Session, command: ActionCommand) -> Result<()> {
    let target = command.target().clone();
    let reason = require_reason(&target.reason)?;
    let kind = RecordKind::Original;

    let payload = match command {
        ActionCommand::Convert { tool, output, .. } => {
            ActionPayload::Convert(ConvertAction { tool, output })
        }
        ActionCommand::Extract {
            tool, extension, ..
        } => ActionPayload::Extract(ExtractAction { tool, extension }),
        ActionCommand::Manual { process, .. } => ActionPayload::Manual(ManualAction {
            reason: reason.clone(),
            process,
        }),
        ActionCommand::Ignore { template, .. } => ActionPayload::Ignore(IgnoreAction {
            template,
            reason: Some(reason.clone()),
        }),
        ActionCommand::Copy {
            puid,
            action,
            actions,
            ..
        } => return run_copy(session, &target, &puid, action.as_deref(), actions),
    };

    let data = json!({ "query": target.query, "action": payload.action() });
    edit(session, commands::EDIT_ACTION, kind, &target, data, |ctx, db, query| {
        set_action(ctx, db, query, &payload)
    })
}

fn run_copy(
    session: &Session,
    target: &EditTarget,
    puid: &str,
    action: Option<&str>,
    actions: Option<PathBuf>,
) -> Result<()> {
    let catalog = config::load_actions(actions.as_deref())?;
    let Some(entry) = catalog.get(puid) else {
        return Err(HelpfulError::new(format!("No action catalog entry for '{}'", puid))
            .with_suggestion("TRY: Check the format code, e.g. fmt/40")
            .into());
    };
    let action = match action {
        Some(text) => text.parse::<Action>()?,
        None => entry.action,
    };
    let data = json!({ "query": target.query, "puid": puid, "action": action });
    let settings = entry.data.clone();
    edit(
        session,
        commands::EDIT_ACTION,
        RecordKind::Original,
        target,
        data,
        |ctx, db, query| set_action_data(ctx, db, query, action, &settings),
    )
}

fn run_remove(
    session: &Session,
    target: EditTarget,
    kind: RecordKind,
    delete: bool,
    reset_processed: bool,
) -> Result<()> {
    let reason = require_reason(&target.reason)?;
    let query = compile_query(kind, &target.query)?;
    let db = session.open()?;
    let ctx = session.context(commands::EDIT_REMOVE, Some(reason), target.dry_run);
    let options = RemoveOptions {
        delete_files: delete,
        reset_processed,
    };
    let data = json!({
        "query": target.query,
        "kind": kind,
        "delete": delete,
        "reset_processed": reset_processed,
    });

    let summary = journaled(&ctx, &db, data, || {
        remove_matching(&ctx, &db, kind, &query, options)
    })?;
    report(
        &ctx,
        format!(
            "Matched {} {} records, removed {} records{}",
            summary.matched,
            kind,
            summary.removed,
            if delete { " and their files" } else { "" }
        ),
    );
    Ok(())
}

fn run_rollback(
    session: &Session,
    selector: &str,
    reason: &str,
    resume_partial: bool,
    dry_run: bool,
) -> Result<()> {
    let reason = require_reason(reason)?;
    let db = session.open()?;
    let path = session.database_path();
    let selector: RunSelector = selector
        .parse()
        .map_err(|err| super::explain(err, &path))?;
    let ctx = session.context(commands::EDIT_ROLLBACK, Some(reason), dry_run);
    let registry = rollback_registry();

    let data = json!({ "selector": format!("{:?}", selector), "resume_partial": resume_partial });
    let reports = journaled(&ctx, &db, data, || {
        rollback(&ctx, &db, &registry, selector, resume_partial)
    })?;

    if reports.is_empty() {
        report(&ctx, "No runs match the selector");
        return Ok(());
    }
    for run in &reports {
        let outcome = match run.result {
            ReplayResult::Completed => format!("rolled back {} events", run.reverted),
            ReplayResult::Partial => format!(
                "partly rolled back: {} reverted, {} failed (retry with --resume-partial)",
                run.reverted, run.failed
            ),
            ReplayResult::Failed => format!("nothing rolled back, {} events failed", run.failed),
            ReplayResult::Skipped(RollbackStatus::Partial) => {
                "skipped, partly rolled back before (use --resume-partial)".to_string()
            }
            ReplayResult::Skipped(_) => "skipped, already rolled back".to_string(),
        };
        report(
            &ctx,
            format!(
                "{} started {}: {}",
                run.run.command(),
                super::output::format_time(&run.run.start.time),
                outcome
            ),
        );
    }
    Ok(())
}
