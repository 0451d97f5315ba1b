//! Catalog database: per-kind record tables plus the event journal.
//!
//! One database per archive root at `<root>/_metadata/archivist.db`, with a
//! single writer enforced by the store's file lock.

mod schema;

use std::cell::Cell;
use std::path::{Path, PathBuf};

use archivist_db::{
    DbConnection, DbTransaction, DbValue, OnConflict, Queryable, Select, TableExt,
};
use archivist_ids::RecordId;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{AccessFile, MasterFile, OriginalFile, Record, RecordKind, StatutoryFile};

pub use schema::SCHEMA_VERSION;

/// Directory under the archive root holding the database and logs.
pub const METADATA_DIR: &str = "_metadata";
/// Database file name inside [`METADATA_DIR`].
pub const DATABASE_FILE: &str = "archivist.db";

/// Default record ordering: case-insensitive path order.
pub const PATH_ORDER: &str = "relative_path COLLATE NOCASE ASC, uuid ASC";

pub struct Database {
    conn: DbConnection,
    /// Time of the newest journaled event, loaded on first append.
    pub(crate) last_event: Cell<Option<i64>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("conn", &self.conn).finish()
    }
}

impl Database {
    /// Database location for an archive root.
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(METADATA_DIR).join(DATABASE_FILE)
    }

    /// Create (or reopen) a database and write the schema version.
    pub fn create(path: &Path) -> Result<Self> {
        let db = Self::wrap(DbConnection::open(path)?);
        schema::ensure_schema(&db.conn)?;
        match db.version()? {
            Some(_) => db.check_version()?,
            None => {
                db.conn.execute(
                    "INSERT INTO metadata (key, value) VALUES ('version', ?)",
                    &[DbValue::from(SCHEMA_VERSION)],
                )?;
                info!("Initialized database {} (version {})", path.display(), SCHEMA_VERSION);
            }
        }
        Ok(db)
    }

    /// Open an initialized database for writing.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotInitialized(path.to_path_buf()));
        }
        let db = Self::wrap(DbConnection::open(path)?);
        db.check_version()?;
        Ok(db)
    }

    /// Open an initialized database without taking the write lock.
    pub fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotInitialized(path.to_path_buf()));
        }
        let db = Self::wrap(DbConnection::open_readonly(path)?);
        db.check_version()?;
        Ok(db)
    }

    /// In-memory database with the current schema (for testing).
    pub fn open_memory() -> Result<Self> {
        let db = Self::wrap(DbConnection::open_memory()?);
        schema::ensure_schema(&db.conn)?;
        db.conn.execute(
            "INSERT INTO metadata (key, value) VALUES ('version', ?)",
            &[DbValue::from(SCHEMA_VERSION)],
        )?;
        Ok(db)
    }

    fn wrap(conn: DbConnection) -> Self {
        Self {
            conn,
            last_event: Cell::new(None),
        }
    }

    pub fn conn(&self) -> &DbConnection {
        &self.conn
    }

    /// Schema version recorded in `metadata`, `None` for an empty file.
    pub fn version(&self) -> Result<Option<String>> {
        if !schema::has_schema(&self.conn)? {
            return Ok(None);
        }
        let row = self.conn.query_optional(
            "SELECT value FROM metadata WHERE key = 'version'",
            &[],
        )?;
        Ok(match row {
            Some(row) => Some(row.get(0)?),
            None => None,
        })
    }

    fn check_version(&self) -> Result<()> {
        let path = self.conn.path().map(Path::to_path_buf).unwrap_or_default();
        match self.version()? {
            None => Err(Error::NotInitialized(path)),
            Some(found) if found != SCHEMA_VERSION => Err(Error::UpgradeRequired {
                found,
                expected: SCHEMA_VERSION.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// Run `op` in one store transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T>(&self, op: impl FnOnce(&DbTransaction<'_>) -> Result<T>) -> Result<T> {
        self.conn.transaction(op)
    }
}

/// Record access for anything that can run statements.
pub trait RecordStore: Queryable + Sized {
    fn records(&self, kind: RecordKind, select: &Select) -> Result<Vec<Record>> {
        let records = match kind {
            RecordKind::Original => self
                .select::<OriginalFile>(select)?
                .into_iter()
                .map(Record::from)
                .collect(),
            RecordKind::Master => self
                .select::<MasterFile>(select)?
                .into_iter()
                .map(Record::from)
                .collect(),
            RecordKind::Access => self
                .select::<AccessFile>(select)?
                .into_iter()
                .map(Record::from)
                .collect(),
            RecordKind::Statutory => self
                .select::<StatutoryFile>(select)?
                .into_iter()
                .map(Record::from)
                .collect(),
        };
        Ok(records)
    }

    fn record(&self, kind: RecordKind, uuid: &RecordId) -> Result<Option<Record>> {
        let select = Select::new()
            .filter("uuid = ?", vec![DbValue::from(uuid.as_str())])
            .limit(1);
        Ok(self.records(kind, &select)?.into_iter().next())
    }

    fn record_by_path(&self, kind: RecordKind, relative_path: &str) -> Result<Option<Record>> {
        let select = Select::new()
            .filter("relative_path = ?", vec![DbValue::from(relative_path)])
            .limit(1);
        Ok(self.records(kind, &select)?.into_iter().next())
    }

    /// Records of `kind` derived from `uuid` (masters of an original, copies of a master).
    fn derived_records(&self, kind: RecordKind, uuid: &RecordId) -> Result<Vec<Record>> {
        let column = match kind {
            RecordKind::Original => "parent",
            _ => "original_uuid",
        };
        let select = Select::new()
            .filter(format!("{} = ?", column), vec![DbValue::from(uuid.as_str())])
            .order_by(PATH_ORDER);
        self.records(kind, &select)
    }

    fn insert_record(&self, record: &Record) -> Result<()> {
        match record {
            Record::Original(file) => self.insert(file, OnConflict::Abort)?,
            Record::Master(file) => self.insert(file, OnConflict::Abort)?,
            Record::Access(file) => self.insert(file, OnConflict::Abort)?,
            Record::Statutory(file) => self.insert(file, OnConflict::Abort)?,
        };
        Ok(())
    }

    /// Write every column of `record`; the row must exist.
    fn update_record(&self, record: &Record) -> Result<()> {
        let changed = match record {
            Record::Original(file) => self.update(file)?,
            Record::Master(file) => self.update(file)?,
            Record::Access(file) => self.update(file)?,
            Record::Statutory(file) => self.update(file)?,
        };
        if changed == 0 {
            return Err(Error::RecordNotFound {
                kind: record.kind().to_string(),
                uuid: record.uuid().to_string(),
            });
        }
        Ok(())
    }

    fn delete_record(&self, record: &Record) -> Result<()> {
        match record {
            Record::Original(file) => self.delete(file)?,
            Record::Master(file) => self.delete(file)?,
            Record::Access(file) => self.delete(file)?,
            Record::Statutory(file) => self.delete(file)?,
        };
        Ok(())
    }

    fn count_records(&self, kind: RecordKind, clause: &str, params: &[DbValue]) -> Result<u64> {
        let count = match kind {
            RecordKind::Original => self.count::<OriginalFile>(clause, params)?,
            RecordKind::Master => self.count::<MasterFile>(clause, params)?,
            RecordKind::Access => self.count::<AccessFile>(clause, params)?,
            RecordKind::Statutory => self.count::<StatutoryFile>(clause, params)?,
        };
        Ok(count)
    }

    /// True if any kind's table already has `relative_path`.
    fn is_registered(&self, relative_path: &str) -> Result<bool> {
        for kind in RecordKind::ALL {
            if self
                .count_records(kind, "relative_path = ?", &[DbValue::from(relative_path)])?
                > 0
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<Q: Queryable> RecordStore for Q {}

