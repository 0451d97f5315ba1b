use archivist::database::PATH_ORDER;
use archivist::{RecordKind, RecordStore};
use archivist_db::Select;

use super::error::HelpfulError;
use super::output::{print_table, record_row, RECORD_HEADERS};
use super::{compile_query, Session};

#[derive(Debug)]
pub struct SearchArgs {
    pub query: String,
    pub kind: RecordKind,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub sort: Option<String>,
    pub json: bool,
}

pub fn run(session: &Session, args: SearchArgs) -> anyhow::Result<()> {
    let query = compile_query(args.kind, &args.query)?;
    let order = match &args.sort {
        None => PATH_ORDER.to_string(),
        Some(field) if args.kind.columns().contains(&field.as_str()) => {
            format!("{} ASC, uuid ASC", field)
        }
        Some(field) => {
            return Err(HelpfulError::new(format!("Cannot sort by '{}'", field))
                .with_context(format!(
                    "Fields of {} records: {}",
                    args.kind,
                    args.kind.columns().join(", ")
                ))
                .into())
        }
    };

    let db = session.open_readonly()?;
    let (clause, params) = query.to_where();
    let mut select = Select::new().filter(clause, params).order_by(order);
    if let Some(limit) = args.limit {
        select = select.limit(limit);
    }
    if let Some(offset) = args.offset {
        select = select.offset(offset);
    }
    let records = db.conn().records(args.kind, &select)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No {} records match.", args.kind);
        return Ok(());
    }
    print_table(&RECORD_HEADERS, records.iter().map(record_row).collect());
    println!("{} records", records.len());
    Ok(())
}
