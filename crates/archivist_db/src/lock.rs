//! Single-writer locking for catalog files.
//!
//! A writer holds an fs2 advisory lock on `<db>.lock` for as long as its
//! connection is open, and records itself in `<db>.lock.json` so that a
//! blocked command can report who owns the catalog. Readers never lock.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{DbError, Result};

/// The process currently writing to a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    /// Command line of the holder, program name first.
    pub command: String,
    pub since: DateTime<Utc>,
}

impl LockHolder {
    fn this_process() -> Self {
        Self {
            pid: std::process::id(),
            command: std::env::args().collect::<Vec<_>>().join(" "),
            since: Utc::now(),
        }
    }

    fn sidecar(lock_path: &Path) -> PathBuf {
        let mut name = lock_path.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    fn save(&self, sidecar: &Path) -> io::Result<()> {
        let payload = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        fs::write(sidecar, payload)
    }

    fn load(sidecar: &Path) -> Option<Self> {
        let payload = fs::read(sidecar).ok()?;
        serde_json::from_slice(&payload).ok()
    }
}

/// Held write lock; dropping it removes the holder record and unlocks.
pub(crate) struct WriteLock {
    _file: File,
    sidecar: Option<PathBuf>,
}

impl WriteLock {
    /// Take the write lock for `db_path` without blocking.
    pub(crate) fn acquire(db_path: &Path) -> Result<Self> {
        let lock_path = lock_path_for(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        // Fully qualified so the fs2 method wins over std's File::try_lock_exclusive.
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            return Err(if e.kind() == io::ErrorKind::WouldBlock {
                DbError::Locked(db_path.display().to_string())
            } else {
                DbError::Io(e)
            });
        }
        debug!(lock = %lock_path.display(), "Acquired write lock");

        let sidecar = LockHolder::sidecar(&lock_path);
        let sidecar = match LockHolder::this_process().save(&sidecar) {
            Ok(()) => Some(sidecar),
            Err(e) => {
                warn!(path = %sidecar.display(), "Could not record lock holder: {}", e);
                None
            }
        };
        Ok(Self {
            _file: file,
            sidecar,
        })
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        // The advisory lock itself goes away with the file handle.
        if let Some(sidecar) = &self.sidecar {
            let _ = fs::remove_file(sidecar);
        }
    }
}

/// `<db>.lock` next to the catalog, keeping the catalog's own extension.
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// The process holding the write lock on `db_path`, if it recorded itself.
pub fn lock_holder(db_path: &Path) -> Option<LockHolder> {
    LockHolder::load(&LockHolder::sidecar(&lock_path_for(db_path)))
}
