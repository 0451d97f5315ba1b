//! Single-writer SQLite store for Archivist.
//!
//! Provides:
//! - [`DbConnection`]: exclusive-lock read/write or lock-free read-only access
//! - [`Queryable`]: statements against a connection or an open transaction
//! - [`Model`] and [`TableExt`]: typed rows mapped to tables
//!
//! # Usage
//!
//! ```rust,ignore
//! use archivist_db::{DbConnection, Queryable, Select, TableExt};
//!
//! let conn = DbConnection::open(path)?;
//! conn.transaction(|tx| {
//!     tx.insert(&record, OnConflict::Abort)?;
//!     Ok::<_, DbError>(())
//! })?;
//! let rows: Vec<MyModel> = conn.select(&Select::new().limit(10))?;
//! ```

mod connection;
mod error;
pub mod lock;
mod table;
mod value;

pub use connection::{AccessMode, DbConnection, DbTransaction, Queryable};
pub use error::{DbError, Result};
pub use lock::{lock_holder, lock_path_for, LockHolder};
pub use table::{quote_ident, Model, OnConflict, Select, TableExt};
pub use value::{DbRow, DbTimestamp, DbValue, FromDbValue};
