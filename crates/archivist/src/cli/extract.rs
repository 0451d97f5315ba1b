use std::path::PathBuf;

use archivist::commands;
use archivist::extract::{extract_archives, ZipExtractor};
use archivist::RecordKind;
use serde_json::json;

use super::{compile_query, config, journaled, report, Session};

#[derive(Debug)]
pub struct ExtractArgs {
    pub query: String,
    pub actions: Option<PathBuf>,
    pub reason: Option<String>,
    pub dry_run: bool,
}

pub fn run(session: &Session, args: ExtractArgs) -> anyhow::Result<()> {
    let query = compile_query(RecordKind::Original, &args.query)?;
    let catalog = config::load_actions(args.actions.as_deref())?;
    let db = session.open()?;
    let ctx = session.context(commands::EXTRACT, args.reason, args.dry_run);

    let summary = journaled(&ctx, &db, json!({ "query": args.query }), || {
        extract_archives(
            &ctx,
            &db,
            &ZipExtractor,
            &config::identifier(),
            &catalog,
            &query,
        )
    })?;

    report(
        &ctx,
        format!(
            "Extracted {} archives ({} files), {} failed, {} skipped",
            summary.extracted, summary.files, summary.failed, summary.skipped
        ),
    );
    Ok(())
}
