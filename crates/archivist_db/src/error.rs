//! Error types for the store layer.

use thiserror::Error;

/// Store operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Store errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds the write lock
    #[error("Database is locked by another process: {0}")]
    Locked(String),

    /// Write attempted on a read-only connection
    #[error("Operation requires write access but database is read-only")]
    ReadOnly,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation (unique, not null, etc.)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Column value could not be converted to the requested type
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// Caller supplied an invalid request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Commit or rollback failed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a type conversion error.
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True for failures of the store itself, as opposed to bad data read from it.
    ///
    /// Callers replaying work against the store stop on these.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(_)
                | DbError::Io(_)
                | DbError::Locked(_)
                | DbError::ReadOnly
                | DbError::Constraint(_)
                | DbError::Transaction(_)
        )
    }

    /// Classify a raw SQLite error, splitting out constraint violations.
    pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => Self::Constraint(err.to_string()),
            _ => Self::Sqlite(err),
        }
    }
}
