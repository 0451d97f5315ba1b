//! Journal entries.

use archivist_db::{DbError, DbRow, DbTimestamp, DbValue, Model};
use archivist_ids::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{Patch, Record, RecordKind};
use crate::error::{Error, Result};

/// One append-only journal entry.
///
/// `operation` is `<command>:<verb>`, e.g. `archivist.edit.lock:edit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time: DbTimestamp,
    pub operation: String,
    pub file_uuid: Option<RecordId>,
    pub file_type: Option<RecordKind>,
    pub data: Option<Value>,
    pub reason: Option<String>,
}

impl Event {
    /// New event; the journal assigns the final time when it is appended.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            time: DbTimestamp::now(),
            operation: operation.into(),
            file_uuid: None,
            file_type: None,
            data: None,
            reason: None,
        }
    }

    pub fn with_record(self, record: &Record) -> Self {
        self.with_subject(record.kind(), record.uuid().clone())
    }

    pub fn with_subject(mut self, kind: RecordKind, uuid: RecordId) -> Self {
        self.file_type = Some(kind);
        self.file_uuid = Some(uuid);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(str::to_string);
        self
    }

    /// Command part of the operation (before the first `:`).
    pub fn command(&self) -> &str {
        command_of(&self.operation)
    }

    /// Verb part of the operation (after the first `:`), empty if absent.
    pub fn verb(&self) -> &str {
        self.operation
            .split_once(':')
            .map(|(_, verb)| verb)
            .unwrap_or("")
    }

    pub fn subject(&self) -> Option<(RecordKind, &RecordId)> {
        match (&self.file_type, &self.file_uuid) {
            (Some(kind), Some(uuid)) => Some((*kind, uuid)),
            _ => None,
        }
    }

    /// Payload of an edit event: `[old, new]`, each an object of touched fields.
    pub fn edit_patches(&self) -> Result<(Patch, Patch)> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| Error::corrupt_event(self.time, "edit event without data"))?;
        match data {
            Value::Array(items) if items.len() == 2 => match (&items[0], &items[1]) {
                (Value::Object(old), Value::Object(new)) => Ok((old.clone(), new.clone())),
                _ => Err(Error::corrupt_event(
                    self.time,
                    "edit data must hold two field objects",
                )),
            },
            _ => Err(Error::corrupt_event(self.time, "edit data must be [old, new]")),
        }
    }
}

/// Command part of an operation name.
pub fn command_of(operation: &str) -> &str {
    operation
        .split_once(':')
        .map(|(command, _)| command)
        .unwrap_or(operation)
}

impl Model for Event {
    const TABLE: &'static str = "events";
    const COLUMNS: &'static [&'static str] =
        &["time", "operation", "file_uuid", "file_type", "data", "reason"];
    const PRIMARY_KEY: &'static str = "time";

    fn to_values(&self) -> Vec<DbValue> {
        vec![
            DbValue::from(self.time),
            DbValue::from(&self.operation),
            DbValue::from(self.file_uuid.as_ref().map(|id| id.as_str())),
            DbValue::from(self.file_type.map(|kind| kind.as_str())),
            DbValue::from(self.data.as_ref().map(Value::to_string)),
            DbValue::from(self.reason.clone()),
        ]
    }

    fn from_row(row: &DbRow) -> archivist_db::Result<Self> {
        let file_uuid: Option<String> = row.get_by_name("file_uuid")?;
        let file_uuid = file_uuid
            .map(|raw| RecordId::parse(&raw).map_err(|e| DbError::conversion(e.to_string())))
            .transpose()?;
        let file_type: Option<String> = row.get_by_name("file_type")?;
        let file_type = file_type
            .map(|raw| {
                raw.parse::<RecordKind>()
                    .map_err(|e| DbError::conversion(e.to_string()))
            })
            .transpose()?;
        let data: Option<String> = row.get_by_name("data")?;
        let data = data.map(|raw| serde_json::from_str(&raw)).transpose()?;
        Ok(Self {
            time: row.get_by_name("time")?,
            operation: row.get_by_name("operation")?,
            file_uuid,
            file_type,
            data,
            reason: row.get_by_name("reason")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_parts() {
        let event = Event::new("archivist.edit.rollback:run:partial");
        assert_eq!(event.command(), "archivist.edit.rollback");
        assert_eq!(event.verb(), "run:partial");
        assert_eq!(Event::new("plain").verb(), "");
    }

    #[test]
    fn edit_patches_parse_old_and_new() {
        let event = Event::new("x:edit").with_data(json!([{"lock": false}, {"lock": true}]));
        let (old, new) = event.edit_patches().unwrap();
        assert_eq!(old["lock"], json!(false));
        assert_eq!(new["lock"], json!(true));
    }

    #[test]
    fn malformed_edit_data_is_corrupt() {
        let event = Event::new("x:edit").with_data(json!(["lock", false, true]));
        assert!(matches!(
            event.edit_patches(),
            Err(Error::CorruptEvent { .. })
        ));
        assert!(Event::new("x:edit").edit_patches().is_err());
    }
}
