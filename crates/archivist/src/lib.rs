//! Archivist - event-sourced catalog editing for digital archives.
//!
//! Every change to the catalog is journaled with the values it replaced, so a
//! whole command run can be rolled back later.

pub mod context;
pub mod database;
pub mod edit;
pub mod error;
pub mod extract;
pub mod identify;
pub mod journal;
pub mod models;
pub mod query;
pub mod rollback;

pub use context::{commands, CommandContext};
pub use database::{Database, RecordStore};
pub use error::{Error, Result};
pub use journal::{EventFilter, Run};
pub use models::{Event, Record, RecordKind};
pub use query::{Query, QueryCompiler};
pub use rollback::{RollbackRegistry, RunSelector};

/// Registry with the inverse of every reversible operation.
pub fn rollback_registry() -> RollbackRegistry {
    let mut registry = RollbackRegistry::new();
    edit::register_rollback(&mut registry);
    edit::rename::register_rollback(&mut registry);
    edit::remove::register_rollback(&mut registry);
    identify::register_rollback(&mut registry);
    extract::register_rollback(&mut registry);
    registry
}
