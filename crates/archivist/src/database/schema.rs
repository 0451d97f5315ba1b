//! Table definitions for the catalog database.

use archivist_db::Queryable;
use tracing::info;

use crate::error::Result;

/// Version written to `metadata` by this build.
pub const SCHEMA_VERSION: &str = "1.0.0";

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files_original (
    uuid TEXT PRIMARY KEY,
    relative_path TEXT NOT NULL UNIQUE,
    checksum TEXT NOT NULL,
    size INTEGER NOT NULL,
    puid TEXT,
    signature TEXT,
    warning TEXT,
    action TEXT,
    action_data TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    lock INTEGER NOT NULL DEFAULT 0,
    original_path TEXT,
    parent TEXT
);
CREATE INDEX IF NOT EXISTS idx_files_original_parent ON files_original(parent);

CREATE TABLE IF NOT EXISTS files_master (
    uuid TEXT PRIMARY KEY,
    relative_path TEXT NOT NULL UNIQUE,
    checksum TEXT NOT NULL,
    size INTEGER NOT NULL,
    puid TEXT,
    signature TEXT,
    warning TEXT,
    original_uuid TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    action_data TEXT
);
CREATE INDEX IF NOT EXISTS idx_files_master_original ON files_master(original_uuid);

CREATE TABLE IF NOT EXISTS files_access (
    uuid TEXT PRIMARY KEY,
    relative_path TEXT NOT NULL UNIQUE,
    checksum TEXT NOT NULL,
    size INTEGER NOT NULL,
    puid TEXT,
    signature TEXT,
    warning TEXT,
    original_uuid TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_access_original ON files_access(original_uuid);

CREATE TABLE IF NOT EXISTS files_statutory (
    uuid TEXT PRIMARY KEY,
    relative_path TEXT NOT NULL UNIQUE,
    checksum TEXT NOT NULL,
    size INTEGER NOT NULL,
    puid TEXT,
    signature TEXT,
    warning TEXT,
    original_uuid TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_statutory_original ON files_statutory(original_uuid);

CREATE TABLE IF NOT EXISTS events (
    time INTEGER PRIMARY KEY,
    operation TEXT NOT NULL,
    file_uuid TEXT,
    file_type TEXT,
    data TEXT,
    reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_events_operation ON events(operation);
CREATE INDEX IF NOT EXISTS idx_events_file ON events(file_uuid);
"#;

/// Create all tables if they don't exist.
pub(crate) fn ensure_schema<Q: Queryable>(conn: &Q) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    info!("Database schema verified");
    Ok(())
}

/// True once `metadata` exists.
pub(crate) fn has_schema<Q: Queryable>(conn: &Q) -> Result<bool> {
    let count: i64 = conn.query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
        &[],
    )?;
    Ok(count > 0)
}
