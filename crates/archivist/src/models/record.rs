//! Cataloged files, one table per kind.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use archivist_db::{DbError, DbRow, DbValue, Model};
use archivist_ids::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::action::{Action, ActionData};
use crate::error::{Error, Result};

/// Field name to JSON value, for the subset of fields an edit touches.
pub type Patch = Map<String, Value>;

/// Bit set on a master's `processed` mask once access copies exist.
pub const MASTER_PROCESSED_ACCESS: u8 = 1;
/// Bit set on a master's `processed` mask once statutory copies exist.
pub const MASTER_PROCESSED_STATUTORY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Original,
    Master,
    Access,
    Statutory,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Original,
        RecordKind::Master,
        RecordKind::Access,
        RecordKind::Statutory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Original => "original",
            RecordKind::Master => "master",
            RecordKind::Access => "access",
            RecordKind::Statutory => "statutory",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Original => OriginalFile::TABLE,
            RecordKind::Master => MasterFile::TABLE,
            RecordKind::Access => AccessFile::TABLE,
            RecordKind::Statutory => StatutoryFile::TABLE,
        }
    }

    /// Columns of this kind's table; also the fields a query may name.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Original => OriginalFile::COLUMNS,
            RecordKind::Master => MasterFile::COLUMNS,
            RecordKind::Access => AccessFile::COLUMNS,
            RecordKind::Statutory => StatutoryFile::COLUMNS,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" | "originals" => Ok(RecordKind::Original),
            "master" | "masters" => Ok(RecordKind::Master),
            "access" => Ok(RecordKind::Access),
            "statutory" => Ok(RecordKind::Statutory),
            other => Err(Error::invalid_value("kind", format!("unknown record kind '{}'", other))),
        }
    }
}

/// Columns every kind shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBase {
    pub uuid: RecordId,
    /// Path below the archive root, `/`-separated.
    pub relative_path: String,
    pub checksum: String,
    pub size: i64,
    pub puid: Option<String>,
    pub signature: Option<String>,
    pub warning: Option<String>,
}

impl FileBase {
    pub fn new(relative_path: impl Into<String>, checksum: impl Into<String>, size: i64) -> Self {
        Self {
            uuid: RecordId::new(),
            relative_path: relative_path.into(),
            checksum: checksum.into(),
            size,
            puid: None,
            signature: None,
            warning: None,
        }
    }

    /// Absolute location of the file under `root`.
    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(relative_to_path(&self.relative_path))
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }

    fn values(&self) -> Vec<DbValue> {
        vec![
            DbValue::from(self.uuid.as_str()),
            DbValue::from(&self.relative_path),
            DbValue::from(&self.checksum),
            DbValue::from(self.size),
            DbValue::from(self.puid.clone()),
            DbValue::from(self.signature.clone()),
            DbValue::from(self.warning.clone()),
        ]
    }

    fn from_row(row: &DbRow) -> archivist_db::Result<Self> {
        Ok(Self {
            uuid: record_id(row, "uuid")?,
            relative_path: row.get_by_name("relative_path")?,
            checksum: row.get_by_name("checksum")?,
            size: row.get_by_name("size")?,
            puid: row.get_by_name("puid")?,
            signature: row.get_by_name("signature")?,
            warning: row.get_by_name("warning")?,
        })
    }
}

/// Convert a `/`-separated relative path into a platform path.
pub fn relative_to_path(relative: &str) -> PathBuf {
    relative.split('/').filter(|part| !part.is_empty()).collect()
}

/// Convert a path below the archive root into its `/`-separated form.
pub fn path_to_relative(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn record_id(row: &DbRow, column: &str) -> archivist_db::Result<RecordId> {
    let raw: String = row.get_by_name(column)?;
    RecordId::parse(&raw).map_err(|e| DbError::conversion(format!("Column '{}': {}", column, e)))
}

fn optional_record_id(row: &DbRow, column: &str) -> archivist_db::Result<Option<RecordId>> {
    let raw: Option<String> = row.get_by_name(column)?;
    raw.map(|value| {
        RecordId::parse(&value)
            .map_err(|e| DbError::conversion(format!("Column '{}': {}", column, e)))
    })
    .transpose()
}

fn action_data_value(data: &ActionData) -> archivist_db::Result<DbValue> {
    if data.is_empty() {
        return Ok(DbValue::Null);
    }
    Ok(DbValue::from(serde_json::to_string(data)?))
}

fn action_data_from_row(row: &DbRow) -> archivist_db::Result<ActionData> {
    let raw: Option<String> = row.get_by_name("action_data")?;
    match raw {
        Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(&text)?),
        _ => Ok(ActionData::default()),
    }
}

/// A file as deposited, or as extracted from a deposited archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalFile {
    #[serde(flatten)]
    pub base: FileBase,
    pub action: Option<Action>,
    #[serde(default)]
    pub action_data: ActionData,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub lock: bool,
    /// Path inside the parent archive, for extracted files.
    pub original_path: Option<String>,
    /// Archive this file was extracted from.
    pub parent: Option<RecordId>,
}

impl OriginalFile {
    pub fn new(base: FileBase) -> Self {
        Self {
            base,
            action: None,
            action_data: ActionData::default(),
            processed: false,
            lock: false,
            original_path: None,
            parent: None,
        }
    }
}

impl Model for OriginalFile {
    const TABLE: &'static str = "files_original";
    const COLUMNS: &'static [&'static str] = &[
        "uuid",
        "relative_path",
        "checksum",
        "size",
        "puid",
        "signature",
        "warning",
        "action",
        "action_data",
        "processed",
        "lock",
        "original_path",
        "parent",
    ];
    const PRIMARY_KEY: &'static str = "uuid";

    fn to_values(&self) -> Vec<DbValue> {
        let mut values = self.base.values();
        values.push(DbValue::from(self.action.map(|a| a.as_str())));
        values.push(action_data_value(&self.action_data).unwrap_or(DbValue::Null));
        values.push(DbValue::from(self.processed));
        values.push(DbValue::from(self.lock));
        values.push(DbValue::from(self.original_path.clone()));
        values.push(DbValue::from(self.parent.as_ref().map(|p| p.as_str())));
        values
    }

    fn from_row(row: &DbRow) -> archivist_db::Result<Self> {
        let action: Option<String> = row.get_by_name("action")?;
        let action = action
            .map(|a| {
                a.parse::<Action>()
                    .map_err(|e| DbError::conversion(e.to_string()))
            })
            .transpose()?;
        Ok(Self {
            base: FileBase::from_row(row)?,
            action,
            action_data: action_data_from_row(row)?,
            processed: row.get_by_name("processed")?,
            lock: row.get_by_name("lock")?,
            original_path: row.get_by_name("original_path")?,
            parent: optional_record_id(row, "parent")?,
        })
    }
}

/// A preservation master derived from an original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterFile {
    #[serde(flatten)]
    pub base: FileBase,
    pub original_uuid: RecordId,
    /// Bitmask of [`MASTER_PROCESSED_ACCESS`] and [`MASTER_PROCESSED_STATUTORY`].
    #[serde(default)]
    pub processed: u8,
    #[serde(default)]
    pub action_data: ActionData,
}

impl Model for MasterFile {
    const TABLE: &'static str = "files_master";
    const COLUMNS: &'static [&'static str] = &[
        "uuid",
        "relative_path",
        "checksum",
        "size",
        "puid",
        "signature",
        "warning",
        "original_uuid",
        "processed",
        "action_data",
    ];
    const PRIMARY_KEY: &'static str = "uuid";

    fn to_values(&self) -> Vec<DbValue> {
        let mut values = self.base.values();
        values.push(DbValue::from(self.original_uuid.as_str()));
        values.push(DbValue::from(self.processed));
        values.push(action_data_value(&self.action_data).unwrap_or(DbValue::Null));
        values
    }

    fn from_row(row: &DbRow) -> archivist_db::Result<Self> {
        Ok(Self {
            base: FileBase::from_row(row)?,
            original_uuid: record_id(row, "original_uuid")?,
            processed: row.get_by_name("processed")?,
            action_data: action_data_from_row(row)?,
        })
    }
}

/// A copy of a master made for public access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessFile {
    #[serde(flatten)]
    pub base: FileBase,
    /// The master this copy was made from.
    pub original_uuid: RecordId,
}

impl Model for AccessFile {
    const TABLE: &'static str = "files_access";
    const COLUMNS: &'static [&'static str] = &[
        "uuid",
        "relative_path",
        "checksum",
        "size",
        "puid",
        "signature",
        "warning",
        "original_uuid",
    ];
    const PRIMARY_KEY: &'static str = "uuid";

    fn to_values(&self) -> Vec<DbValue> {
        let mut values = self.base.values();
        values.push(DbValue::from(self.original_uuid.as_str()));
        values
    }

    fn from_row(row: &DbRow) -> archivist_db::Result<Self> {
        Ok(Self {
            base: FileBase::from_row(row)?,
            original_uuid: record_id(row, "original_uuid")?,
        })
    }
}

/// A copy of a master made for statutory deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatutoryFile {
    #[serde(flatten)]
    pub base: FileBase,
    /// The master this copy was made from.
    pub original_uuid: RecordId,
}

impl Model for StatutoryFile {
    const TABLE: &'static str = "files_statutory";
    const COLUMNS: &'static [&'static str] = &[
        "uuid",
        "relative_path",
        "checksum",
        "size",
        "puid",
        "signature",
        "warning",
        "original_uuid",
    ];
    const PRIMARY_KEY: &'static str = "uuid";

    fn to_values(&self) -> Vec<DbValue> {
        let mut values = self.base.values();
        values.push(DbValue::from(self.original_uuid.as_str()));
        values
    }

    fn from_row(row: &DbRow) -> archivist_db::Result<Self> {
        Ok(Self {
            base: FileBase::from_row(row)?,
            original_uuid: record_id(row, "original_uuid")?,
        })
    }
}

/// Any cataloged file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Original(OriginalFile),
    Master(MasterFile),
    Access(AccessFile),
    Statutory(StatutoryFile),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Original(_) => RecordKind::Original,
            Record::Master(_) => RecordKind::Master,
            Record::Access(_) => RecordKind::Access,
            Record::Statutory(_) => RecordKind::Statutory,
        }
    }

    pub fn base(&self) -> &FileBase {
        match self {
            Record::Original(file) => &file.base,
            Record::Master(file) => &file.base,
            Record::Access(file) => &file.base,
            Record::Statutory(file) => &file.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut FileBase {
        match self {
            Record::Original(file) => &mut file.base,
            Record::Master(file) => &mut file.base,
            Record::Access(file) => &mut file.base,
            Record::Statutory(file) => &mut file.base,
        }
    }

    pub fn uuid(&self) -> &RecordId {
        &self.base().uuid
    }

    pub fn relative_path(&self) -> &str {
        &self.base().relative_path
    }

    pub fn as_original(&self) -> Option<&OriginalFile> {
        match self {
            Record::Original(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_master(&self) -> Option<&MasterFile> {
        match self {
            Record::Master(file) => Some(file),
            _ => None,
        }
    }

    /// Record this one was derived from, if any.
    pub fn derived_from(&self) -> Option<(RecordKind, &RecordId)> {
        match self {
            Record::Original(file) => file.parent.as_ref().map(|p| (RecordKind::Original, p)),
            Record::Master(file) => Some((RecordKind::Original, &file.original_uuid)),
            Record::Access(file) => Some((RecordKind::Master, &file.original_uuid)),
            Record::Statutory(file) => Some((RecordKind::Master, &file.original_uuid)),
        }
    }

    fn fields(&self) -> Result<Patch> {
        let value = match self {
            Record::Original(file) => serde_json::to_value(file)?,
            Record::Master(file) => serde_json::to_value(file)?,
            Record::Access(file) => serde_json::to_value(file)?,
            Record::Statutory(file) => serde_json::to_value(file)?,
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(Error::invalid_value("record", "record did not serialize to an object")),
        }
    }

    /// Current values of `fields`.
    pub fn snapshot<'a>(&self, fields: impl IntoIterator<Item = &'a String>) -> Result<Patch> {
        let all = self.fields()?;
        let mut snapshot = Patch::new();
        for field in fields {
            self.check_field(field)?;
            let value = all.get(field.as_str()).cloned().unwrap_or(Value::Null);
            snapshot.insert(field.clone(), value);
        }
        Ok(snapshot)
    }

    /// A copy of this record with `patch` applied.
    pub fn patched(&self, patch: &Patch) -> Result<Record> {
        let mut all = self.fields()?;
        for (field, value) in patch {
            self.check_field(field)?;
            if field == "uuid" {
                return Err(Error::invalid_value("uuid", "record ids are immutable"));
            }
            all.insert(field.clone(), value.clone());
        }
        let value = Value::Object(all);
        let record = match self.kind() {
            RecordKind::Original => Record::Original(serde_json::from_value(value)?),
            RecordKind::Master => Record::Master(serde_json::from_value(value)?),
            RecordKind::Access => Record::Access(serde_json::from_value(value)?),
            RecordKind::Statutory => Record::Statutory(serde_json::from_value(value)?),
        };
        Ok(record)
    }

    fn check_field(&self, field: &str) -> Result<()> {
        if self.kind().columns().contains(&field) {
            Ok(())
        } else {
            Err(Error::invalid_value(
                field,
                format!("not a field of {} files", self.kind()),
            ))
        }
    }
}

impl From<OriginalFile> for Record {
    fn from(file: OriginalFile) -> Self {
        Record::Original(file)
    }
}

impl From<MasterFile> for Record {
    fn from(file: MasterFile) -> Self {
        Record::Master(file)
    }
}

impl From<AccessFile> for Record {
    fn from(file: AccessFile) -> Self {
        Record::Access(file)
    }
}

impl From<StatutoryFile> for Record {
    fn from(file: StatutoryFile) -> Self {
        Record::Statutory(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn original(path: &str) -> Record {
        Record::Original(OriginalFile::new(FileBase::new(path, "abc", 10)))
    }

    fn patch(value: Value) -> Patch {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn snapshot_reads_flattened_and_nested_fields() {
        let record = original("docs/report.pdf");
        let fields = vec!["relative_path".to_string(), "lock".to_string()];
        let snapshot = record.snapshot(&fields).unwrap();
        assert_eq!(
            Value::Object(snapshot),
            json!({"relative_path": "docs/report.pdf", "lock": false})
        );
    }

    #[test]
    fn patched_applies_values_and_keeps_the_rest() {
        let record = original("a.txt");
        let updated = record
            .patched(&patch(json!({"puid": "fmt/111", "action": "ignore"})))
            .unwrap();
        let file = updated.as_original().unwrap();
        assert_eq!(file.base.puid.as_deref(), Some("fmt/111"));
        assert_eq!(file.action, Some(Action::Ignore));
        assert_eq!(updated.uuid(), record.uuid());
        assert_eq!(updated.relative_path(), "a.txt");
    }

    #[test]
    fn fields_of_other_kinds_are_rejected() {
        let record = original("a.txt");
        let err = record
            .patched(&patch(json!({"original_uuid": null})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn uuid_cannot_be_patched() {
        let record = original("a.txt");
        let err = record
            .patched(&patch(json!({"uuid": RecordId::new().as_str()})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[test]
    fn record_serializes_with_kind_tag() {
        let record = original("a.txt");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "original");
        assert_eq!(value["relative_path"], "a.txt");
        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn relative_paths_roundtrip() {
        let root = Path::new("/archive");
        let path = root.join("a").join("b.txt");
        assert_eq!(path_to_relative(root, &path).as_deref(), Some("a/b.txt"));
        assert_eq!(root.join(relative_to_path("a/b.txt")), path);
        assert_eq!(path_to_relative(root, root), None);
    }

    #[test]
    fn kind_parses_plural_names() {
        assert_eq!("masters".parse::<RecordKind>().unwrap(), RecordKind::Master);
        assert!("derivative".parse::<RecordKind>().is_err());
    }
}
