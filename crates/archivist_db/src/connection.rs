//! Synchronous SQLite connection with single-writer locking.
//!
//! - One writer per database file, enforced with an advisory file lock
//! - Read-only connections never lock and reject writes
//! - Every statement runs inside a `db.exec`/`db.query` debug span

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::OpenFlags;
use tracing::{debug_span, info, warn};

use crate::error::{DbError, Result};
use crate::lock::WriteLock;
use crate::value::{DbRow, DbValue, FromDbValue};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-write access (holds the exclusive lock)
    ReadWrite,
    /// Read-only access (can coexist with a writer)
    ReadOnly,
}

/// Anything statements can run against: a connection or an open transaction.
pub trait Queryable {
    /// The underlying SQLite handle.
    fn raw_connection(&self) -> &rusqlite::Connection;

    /// Get the access mode.
    fn access_mode(&self) -> AccessMode;

    /// Check if this handle has write access.
    fn is_writable(&self) -> bool {
        self.access_mode() == AccessMode::ReadWrite
    }

    /// Execute a SQL statement (no results). Returns the number of changed rows.
    fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64> {
        if !self.is_writable() {
            return Err(DbError::ReadOnly);
        }
        execute_on_conn(self.raw_connection(), sql, params)
    }

    /// Execute a batch of SQL statements.
    fn execute_batch(&self, sql: &str) -> Result<()> {
        if !self.is_writable() {
            return Err(DbError::ReadOnly);
        }
        execute_batch_on_conn(self.raw_connection(), sql)
    }

    /// Query and return all rows.
    fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
        query_on_conn(self.raw_connection(), sql, params)
    }

    /// Query and return the first row, if any.
    fn query_optional(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbRow>> {
        let rows = self.query_all(sql, params)?;
        Ok(rows.into_iter().next())
    }

    /// Query and return exactly one row.
    fn query_one(&self, sql: &str, params: &[DbValue]) -> Result<DbRow> {
        self.query_optional(sql, params)?
            .ok_or_else(|| DbError::not_found("Expected one row, got none"))
    }

    /// Query and return a single scalar value.
    fn query_scalar<T: FromDbValue>(&self, sql: &str, params: &[DbValue]) -> Result<T>
    where
        Self: Sized,
    {
        let row = self.query_one(sql, params)?;
        row.get(0)
    }
}

/// Unified database connection.
pub struct DbConnection {
    // Declared before the guard so the connection closes before the lock is released.
    conn: rusqlite::Connection,
    access_mode: AccessMode,
    path: Option<PathBuf>,
    #[allow(dead_code)]
    lock_guard: Option<WriteLock>,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("backend", &"SQLite")
            .field("path", &self.path)
            .field("access_mode", &self.access_mode)
            .finish()
    }
}

impl DbConnection {
    /// Open (or create) a database with the exclusive write lock.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock_guard = WriteLock::acquire(path)?;

        let conn = rusqlite::Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        info!("Opened database with exclusive lock: {}", path.display());

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadWrite,
            path: Some(path.to_path_buf()),
            lock_guard: Some(lock_guard),
        })
    }

    /// Open an existing database read-only (no lock required).
    pub fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DbError::not_found(format!(
                "Database not found: {}",
                path.display()
            )));
        }
        let conn = rusqlite::Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        info!("Opened database (read-only): {}", path.display());

        Ok(Self {
            conn,
            access_mode: AccessMode::ReadOnly,
            path: Some(path.to_path_buf()),
            lock_guard: None,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Ok(Self {
            conn,
            access_mode: AccessMode::ReadWrite,
            path: None,
            lock_guard: None,
        })
    }

    /// Path of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get the backend name.
    pub fn backend_name(&self) -> &'static str {
        "SQLite"
    }

    /// Run `op` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, E, F>(&self, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&DbTransaction<'_>) -> std::result::Result<T, E>,
        E: From<DbError>,
    {
        if !self.is_writable() {
            return Err(DbError::ReadOnly.into());
        }
        let tx = self.conn.unchecked_transaction().map_err(DbError::from)?;
        let wrapper = DbTransaction { tx };
        match op(&wrapper) {
            Ok(value) => {
                wrapper
                    .tx
                    .commit()
                    .map_err(|e| DbError::Transaction(format!("Commit failed: {}", e)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = wrapper.tx.rollback() {
                    warn!("Transaction rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

impl Queryable for DbConnection {
    fn raw_connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
}

/// Open transaction; statements run through it share one commit.
pub struct DbTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl Queryable for DbTransaction<'_> {
    fn raw_connection(&self) -> &rusqlite::Connection {
        &self.tx
    }

    fn access_mode(&self) -> AccessMode {
        AccessMode::ReadWrite
    }
}

fn execute_on_conn(conn: &rusqlite::Connection, sql: &str, params: &[DbValue]) -> Result<u64> {
    let span = debug_span!(
        "db.exec",
        op = sql_op_name(sql),
        sql_hash = %hash_sql(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql).map_err(DbError::from_sqlite)?;
    let changed = stmt
        .execute(rusqlite::params_from_iter(params.iter()))
        .map_err(DbError::from_sqlite)?;

    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(changed as u64)
}

fn execute_batch_on_conn(conn: &rusqlite::Connection, sql: &str) -> Result<()> {
    let span = debug_span!(
        "db.exec_batch",
        op = "BATCH",
        sql_hash = %hash_sql(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();
    conn.execute_batch(sql).map_err(DbError::from_sqlite)?;
    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(())
}

fn query_on_conn(conn: &rusqlite::Connection, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>> {
    let span = debug_span!(
        "db.query",
        op = sql_op_name(sql),
        sql_hash = %hash_sql(sql),
        duration_ms = tracing::field::Empty
    );
    let _guard = span.enter();
    let start = Instant::now();

    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            values.push(DbValue::from_value_ref(row.get_ref(index)?));
        }
        result.push(DbRow::new(columns.clone(), values));
    }

    span.record("duration_ms", start.elapsed().as_millis() as u64);
    Ok(result)
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit hash for low-cardinality, stable identification.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn transaction_commits_on_ok() {
        let conn = DbConnection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        conn.transaction(|tx| -> Result<()> {
            tx.execute("INSERT INTO t (name) VALUES (?)", &[DbValue::from("alpha")])?;
            tx.execute("INSERT INTO t (name) VALUES (?)", &[DbValue::from("beta")])?;
            Ok(())
        })
        .unwrap();

        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let conn = DbConnection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        let result = conn.transaction(|tx| -> Result<()> {
            tx.execute("INSERT INTO t (name) VALUES (?)", &[DbValue::from("alpha")])?;
            Err(DbError::invalid_input("abort"))
        });
        assert!(matches!(result, Err(DbError::InvalidInput(_))));

        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn unique_violation_is_constraint_error() {
        let conn = DbConnection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE)").unwrap();
        conn.execute("INSERT INTO t (name) VALUES (?)", &[DbValue::from("a")])
            .unwrap();

        let err = conn
            .execute("INSERT INTO t (name) VALUES (?)", &[DbValue::from("a")])
            .unwrap_err();
        assert!(matches!(err, DbError::Constraint(_)));
        assert!(err.is_store_failure());
    }

    #[test]
    fn readonly_rejects_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.db");
        {
            let conn = DbConnection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (name TEXT)").unwrap();
        }

        let ro = DbConnection::open_readonly(&path).unwrap();
        let err = ro
            .execute("INSERT INTO t (name) VALUES (?)", &[DbValue::from("a")])
            .unwrap_err();
        assert!(matches!(err, DbError::ReadOnly));
        let count: i64 = ro.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn open_readonly_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = DbConnection::open_readonly(&tmp.path().join("missing.db")).unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[test]
    fn booleans_are_stored_as_integers() {
        let conn = DbConnection::open_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (flag INTEGER)").unwrap();
        conn.execute("INSERT INTO t (flag) VALUES (?)", &[DbValue::from(true)])
            .unwrap();
        let flag: bool = conn
            .query_scalar("SELECT flag FROM t WHERE flag = ?", &[DbValue::from(true)])
            .unwrap();
        assert!(flag);
    }
}
