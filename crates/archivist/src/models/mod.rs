//! Catalog records, processing actions and journal events.

mod action;
mod event;
mod record;

pub use action::{
    Action, ActionData, ActionPayload, ConvertAction, ExtractAction, IgnoreAction, ManualAction,
};
pub use event::{command_of, Event};
pub use record::{
    path_to_relative, relative_to_path, AccessFile, FileBase, MasterFile, OriginalFile, Patch,
    Record, RecordKind, StatutoryFile, MASTER_PROCESSED_ACCESS, MASTER_PROCESSED_STATUTORY,
};
