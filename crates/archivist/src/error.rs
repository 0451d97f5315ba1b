//! Error types for the catalog engine.

use std::path::PathBuf;

use archivist_db::{DbError, DbTimestamp};
use thiserror::Error;

use crate::extract::ExtractError;
use crate::identify::IdentifyError;
use crate::query::QueryError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Identify(#[from] IdentifyError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database not initialized: {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("Database version {found} is not {expected}, upgrade required")]
    UpgradeRequired { found: String, expected: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("{kind} record {uuid} not found")]
    RecordNotFound { kind: String, uuid: String },

    #[error("File not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("File already exists: {}", .0.display())]
    FileExists(PathBuf),

    #[error("Invalid run selector '{0}'")]
    InvalidSelector(String),

    #[error("Event {time} is malformed: {message}")]
    CorruptEvent { time: DbTimestamp, message: String },

    #[error("Interrupted")]
    Interrupted,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn corrupt_event(time: DbTimestamp, message: impl Into<String>) -> Self {
        Self::CorruptEvent {
            time,
            message: message.into(),
        }
    }

    /// Errors that must stop a replay loop instead of being recorded per item.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Interrupted => true,
            Error::Db(err) => err.is_store_failure(),
            _ => false,
        }
    }

    /// Display strings of this error and every source beneath it.
    pub fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_and_interrupts_are_fatal() {
        assert!(Error::Interrupted.is_fatal());
        assert!(Error::Db(DbError::ReadOnly).is_fatal());
        assert!(!Error::Db(DbError::not_found("x")).is_fatal());
        assert!(!Error::MissingFile(PathBuf::from("a")).is_fatal());
    }

    #[test]
    fn chain_includes_sources() {
        let err = Error::io(
            "/archive/a.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let chain = err.chain();
        assert_eq!(chain.len(), 2);
        assert!(chain[0].contains("/archive/a.txt"));
        assert_eq!(chain[1], "gone");
    }
}
