use archivist::database::SCHEMA_VERSION;
use archivist::{RecordKind, RecordStore};
use archivist_db::Queryable;
use serde_json::json;

use super::output::{format_time, print_table};
use super::Session;

pub fn run(session: &Session, json: bool) -> anyhow::Result<()> {
    let db = session.open_readonly()?;
    let version = db.version()?.unwrap_or_else(|| SCHEMA_VERSION.to_string());

    let mut counts = Vec::new();
    for kind in RecordKind::ALL {
        counts.push((kind, db.conn().count_records(kind, "", &[])?));
    }
    let events: i64 = db.conn().query_scalar("SELECT COUNT(*) FROM events", &[])?;
    let last_run = db.last_run()?;

    if json {
        let tables: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(kind, count)| (kind.to_string(), json!(count)))
            .collect();
        let info = json!({
            "root": session.root.display().to_string(),
            "database": session.database_path().display().to_string(),
            "version": version,
            "records": tables,
            "events": events,
            "last_run": last_run.as_ref().map(|run| json!({
                "command": run.command(),
                "start": run.start.time.to_rfc3339(),
                "end": run.end.time.to_rfc3339(),
                "succeeded": run.succeeded(),
            })),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Archive:  {}", session.root.display());
    println!("Catalog:  {}", session.database_path().display());
    println!("Version:  {}", version);
    println!();
    let mut rows: Vec<Vec<String>> = counts
        .iter()
        .map(|(kind, count)| vec![kind.table().to_string(), count.to_string()])
        .collect();
    rows.push(vec!["events".to_string(), events.to_string()]);
    print_table(&["TABLE", "ROWS"], rows);

    match last_run {
        Some(run) => println!(
            "Last run: {} at {} ({})",
            run.command(),
            format_time(&run.start.time),
            if run.succeeded() { "ok" } else { "error" }
        ),
        None => println!("Last run: none"),
    }
    Ok(())
}
