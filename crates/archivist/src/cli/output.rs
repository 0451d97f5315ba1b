//! Output formatting utilities for CLI commands

use archivist::{Event, Record};
use archivist_db::DbTimestamp;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

/// Format a file size in human-readable form
///
/// Examples:
/// - 500 -> "500 B"
/// - 1024 -> "1.0 KB"
/// - 1536000 -> "1.5 MB"
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Local wall-clock rendering of a journal time.
pub fn format_time(time: &DbTimestamp) -> String {
    time.as_chrono()
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Print a table with headers and rows
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| {
                let cell = Cell::new(text);
                if let Some(c) = color {
                    cell.fg(c)
                } else {
                    cell
                }
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// Color for a journal operation's verb
pub fn color_for_verb(verb: &str) -> Option<Color> {
    match verb {
        "start" | "end" => Some(Color::DarkGrey),
        "edit" => Some(Color::Yellow),
        "new" => Some(Color::Green),
        "remove" | "delete" => Some(Color::Red),
        "error" => Some(Color::Magenta),
        "run" | "run:partial" => Some(Color::Blue),
        _ => None,
    }
}

/// Search result row for any record kind
pub fn record_row(record: &Record) -> Vec<String> {
    let base = record.base();
    let action = record
        .as_original()
        .and_then(|file| file.action)
        .map(|action| action.to_string())
        .unwrap_or_default();
    vec![
        base.uuid.to_string(),
        base.relative_path.clone(),
        base.puid.clone().unwrap_or_default(),
        action,
        format_size(base.size.max(0) as u64),
        base.warning.clone().unwrap_or_default(),
    ]
}

pub const RECORD_HEADERS: [&str; 6] = ["UUID", "PATH", "PUID", "ACTION", "SIZE", "WARNING"];

/// Journal row: time, operation, subject, reason, data
pub fn event_row(event: &Event) -> Vec<(String, Option<Color>)> {
    let subject = match event.subject() {
        Some((kind, uuid)) => format!("{} {}", kind, uuid),
        None => String::new(),
    };
    let data = event
        .data
        .as_ref()
        .map(|data| truncate(&data.to_string(), 80))
        .unwrap_or_default();
    vec![
        (format_time(&event.time), None),
        (event.operation.clone(), color_for_verb(event.verb())),
        (subject, None),
        (event.reason.clone().unwrap_or_default(), None),
        (data, None),
    ]
}

pub const EVENT_HEADERS: [&str; 5] = ["TIME", "OPERATION", "SUBJECT", "REASON", "DATA"];

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
