use archivist::commands;
use archivist::rollback::{parse_time, rollback_status, RollbackStatus};
use archivist::EventFilter;
use archivist_db::DbTimestamp;
use archivist_ids::RecordId;
use clap::Args;
use serde_json::json;

use super::error::HelpfulError;
use super::output::{
    event_row, format_time, print_table, print_table_colored, EVENT_HEADERS,
};
use super::Session;

#[derive(Args, Debug)]
pub struct LogArgs {
    /// Only operations starting with this prefix, e.g. archivist.edit.action
    #[arg(long)]
    pub operation: Option<String>,

    /// Only events at or after this time
    #[arg(long)]
    pub from: Option<String>,

    /// Only events at or before this time
    #[arg(long)]
    pub to: Option<String>,

    /// Only events about this record
    #[arg(long)]
    pub uuid: Option<String>,

    /// List command runs instead of events
    #[arg(long)]
    pub runs: bool,

    #[arg(long, default_value_t = 50)]
    pub limit: u64,

    #[arg(long)]
    pub json: bool,
}

fn time_arg(flag: &str, value: Option<&str>) -> anyhow::Result<Option<DbTimestamp>> {
    match value {
        None => Ok(None),
        Some(text) => parse_time(text).map(Some).ok_or_else(|| {
            HelpfulError::new(format!("Invalid time for --{}: '{}'", flag, text))
                .with_suggestions([
                    "TRY: 2024-03-01T12:00:00Z".to_string(),
                    "TRY: 2024-03-01 12:00".to_string(),
                    "TRY: 2024-03-01".to_string(),
                ])
                .into()
        }),
    }
}

pub fn run(session: &Session, args: LogArgs) -> anyhow::Result<()> {
    let db = session.open_readonly()?;
    if args.runs {
        return list_runs(&db, &args);
    }

    let file_uuid = match &args.uuid {
        Some(text) => Some(RecordId::parse(text).map_err(|err| {
            HelpfulError::new(err.to_string()).with_suggestion("TRY: Copy the UUID from archivist search")
        })?),
        None => None,
    };
    let filter = EventFilter {
        operation_prefix: args.operation.clone(),
        from: time_arg("from", args.from.as_deref())?,
        to: time_arg("to", args.to.as_deref())?,
        file_uuid,
        limit: Some(args.limit),
        descending: true,
    };
    let mut events = db.events(&filter)?;
    events.reverse();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    if events.is_empty() {
        println!("No events match.");
        return Ok(());
    }
    print_table_colored(&EVENT_HEADERS, events.iter().map(event_row).collect());
    Ok(())
}

fn list_runs(db: &archivist::Database, args: &LogArgs) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    let mut listed = Vec::new();
    let mut index = 0;
    for run in db.runs()? {
        let command = run.command().to_string();
        // Numbering matches the rollback selector, which skips rollback runs.
        let number = if command == commands::EDIT_ROLLBACK {
            None
        } else {
            index += 1;
            Some(index)
        };
        if let Some(prefix) = &args.operation {
            if !command.starts_with(prefix.as_str()) {
                continue;
            }
        }
        let status = match number {
            Some(_) => rollback_status(db, commands::EDIT_ROLLBACK, &run)?,
            None => RollbackStatus::None,
        };
        let rolled_back = match status {
            RollbackStatus::None => "",
            RollbackStatus::Full => "rolled back",
            RollbackStatus::Partial => "partially rolled back",
        };

        if args.json {
            listed.push(json!({
                "index": number,
                "command": command,
                "start": run.start.time.to_rfc3339(),
                "end": run.end.time.to_rfc3339(),
                "succeeded": run.succeeded(),
                "reason": run.start.reason,
                "rollback": rolled_back,
            }));
        } else {
            rows.push(vec![
                number.map(|n| n.to_string()).unwrap_or_default(),
                command,
                format_time(&run.start.time),
                format_time(&run.end.time),
                if run.succeeded() { "ok" } else { "error" }.to_string(),
                run.start.reason.clone().unwrap_or_default(),
                rolled_back.to_string(),
            ]);
        }
        if (rows.len() + listed.len()) as u64 >= args.limit {
            break;
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    print_table(
        &["#", "COMMAND", "STARTED", "ENDED", "STATUS", "REASON", "ROLLBACK"],
        rows,
    );
    println!("Select runs for `archivist edit rollback` by the # column.");
    Ok(())
}
