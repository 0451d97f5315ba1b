use std::path::PathBuf;

use archivist::commands;
use archivist::identify::{identify_new_files, reidentify};
use archivist::RecordKind;
use serde_json::json;

use super::{compile_query, config, journaled, report, require_reason, Session};

#[derive(Debug)]
pub struct IdentifyArgs {
    pub actions: Option<PathBuf>,
    pub batch_size: usize,
    pub reason: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct ReidentifyArgs {
    pub query: String,
    pub reason: String,
    pub actions: Option<PathBuf>,
    pub batch_size: usize,
    pub dry_run: bool,
}

pub fn run_identify(session: &Session, args: IdentifyArgs) -> anyhow::Result<()> {
    let catalog = config::load_actions(args.actions.as_deref())?;
    let db = session.open()?;
    let ctx = session.context(commands::IDENTIFY, args.reason, args.dry_run);
    let identifier = config::identifier();

    let summary = journaled(&ctx, &db, json!({ "batch_size": args.batch_size }), || {
        identify_new_files(&ctx, &db, &identifier, &catalog, args.batch_size)
    })?;

    report(
        &ctx,
        format!(
            "Registered {} of {} new files ({} could not be identified)",
            summary.registered, summary.found, summary.failed
        ),
    );
    Ok(())
}

pub fn run_reidentify(session: &Session, args: ReidentifyArgs) -> anyhow::Result<()> {
    let reason = require_reason(&args.reason)?;
    let query = compile_query(RecordKind::Original, &args.query)?;
    let catalog = config::load_actions(args.actions.as_deref())?;
    let db = session.open()?;
    let ctx = session.context(commands::REIDENTIFY, Some(reason), args.dry_run);
    let identifier = config::identifier();

    let summary = journaled(&ctx, &db, json!({ "query": args.query }), || {
        reidentify(&ctx, &db, &identifier, &catalog, &query, args.batch_size)
    })?;

    report(
        &ctx,
        format!(
            "Matched {} originals: {} updated, {} unchanged",
            summary.matched, summary.edited, summary.skipped
        ),
    );
    Ok(())
}
