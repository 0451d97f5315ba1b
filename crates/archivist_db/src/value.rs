//! Parameter and row values exchanged with the store.

use crate::error::DbError;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};

/// Timestamp wrapper for database values, stored as Unix microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbTimestamp {
    inner: chrono::DateTime<chrono::Utc>,
}

impl DbTimestamp {
    /// Current timestamp in UTC, truncated to microsecond precision.
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self::from_unix_micros(now.timestamp_micros()).unwrap_or(Self { inner: now })
    }

    /// Parse an RFC3339 timestamp string.
    pub fn from_rfc3339(value: &str) -> Result<Self, DbError> {
        chrono::DateTime::parse_from_rfc3339(value)
            .map(|dt| Self {
                inner: dt.with_timezone(&chrono::Utc),
            })
            .map_err(|e| DbError::conversion(format!("Invalid timestamp '{}': {}", value, e)))
    }

    /// Construct from Unix microseconds.
    pub fn from_unix_micros(micros: i64) -> Result<Self, DbError> {
        chrono::DateTime::from_timestamp_micros(micros)
            .map(|inner| Self { inner })
            .ok_or_else(|| DbError::conversion(format!("Invalid Unix microseconds: {}", micros)))
    }

    /// Unix microseconds since epoch.
    pub fn unix_micros(&self) -> i64 {
        self.inner.timestamp_micros()
    }

    /// RFC3339 string representation with microseconds.
    pub fn to_rfc3339(&self) -> String {
        self.inner
            .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
    }

    pub fn from_chrono(value: chrono::DateTime<chrono::Utc>) -> Self {
        Self { inner: value }
    }

    pub fn as_chrono(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.inner
    }
}

impl std::fmt::Display for DbTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl serde::Serialize for DbTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> serde::Deserialize<'de> for DbTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        DbTimestamp::from_rfc3339(&raw).map_err(serde::de::Error::custom)
    }
}

/// Value type for query parameters and result columns.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Timestamp(DbTimestamp),
}

impl DbValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    pub(crate) fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => DbValue::Null,
            ValueRef::Integer(v) => DbValue::Integer(v),
            ValueRef::Real(v) => DbValue::Real(v),
            ValueRef::Text(v) => DbValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => DbValue::Blob(v.to_vec()),
        }
    }
}

impl ToSql for DbValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DbValue::Null => ToSqlOutput::Owned(Value::Null),
            DbValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            DbValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            DbValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            DbValue::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            DbValue::Boolean(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            DbValue::Timestamp(v) => ToSqlOutput::Owned(Value::Integer(v.unix_micros())),
        })
    }
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Integer(v as i64)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<u8> for DbValue {
    fn from(v: u8) -> Self {
        DbValue::Integer(v as i64)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<&String> for DbValue {
    fn from(v: &String) -> Self {
        DbValue::Text(v.clone())
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<DbTimestamp> for DbValue {
    fn from(v: DbTimestamp) -> Self {
        DbValue::Timestamp(v)
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(v: Vec<u8>) -> Self {
        DbValue::Blob(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DbValue::Null,
        }
    }
}

/// Row data from a query result.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Vec<String>,
    values: Vec<DbValue>,
}

impl DbRow {
    /// Create a new row with column names and values.
    pub fn new(columns: Vec<String>, values: Vec<DbValue>) -> Self {
        Self { columns, values }
    }

    /// Get a value by column index.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, DbError> {
        self.values
            .get(index)
            .ok_or_else(|| DbError::conversion(format!("Column index {} out of bounds", index)))
            .and_then(|v| T::from_db_value(v))
    }

    /// Get a value by column name.
    pub fn get_by_name<T: FromDbValue>(&self, name: &str) -> Result<T, DbError> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DbError::conversion(format!("Column '{}' not found", name)))?;
        self.get(index)
            .map_err(|e| DbError::conversion(format!("Column '{}': {}", name, e)))
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the column names.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Get the raw DbValue at an index.
    pub fn get_raw(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }
}

/// Trait for converting from DbValue.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError>;
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            DbValue::Boolean(v) => Ok(i64::from(*v)),
            DbValue::Null => Err(DbError::conversion(
                "i64 field is NULL - use Option<i64> for nullable columns",
            )),
            _ => Err(DbError::conversion("Expected integer")),
        }
    }
}

impl FromDbValue for u8 {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        let v = i64::from_db_value(value)?;
        u8::try_from(v).map_err(|_| DbError::conversion(format!("Expected u8, got {}", v)))
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            DbValue::Null => Err(DbError::conversion(
                "f64 field is NULL - use Option<f64> for nullable columns",
            )),
            _ => Err(DbError::conversion("Expected real")),
        }
    }
}

impl FromDbValue for DbTimestamp {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Timestamp(v) => Ok(*v),
            DbValue::Integer(v) => DbTimestamp::from_unix_micros(*v),
            DbValue::Text(v) => DbTimestamp::from_rfc3339(v),
            DbValue::Null => Err(DbError::conversion(
                "DbTimestamp field is NULL - use Option<DbTimestamp> for nullable columns",
            )),
            _ => Err(DbError::conversion("Expected timestamp")),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            DbValue::Null => Err(DbError::conversion(
                "String field is NULL - use Option<String> for nullable columns",
            )),
            _ => Err(DbError::conversion("Expected text")),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v != 0),
            DbValue::Null => Err(DbError::conversion(
                "bool field is NULL - use Option<bool> for nullable columns",
            )),
            _ => Err(DbError::conversion("Expected boolean")),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Null => Ok(None),
            _ => T::from_db_value(value).map(Some),
        }
    }
}

impl FromDbValue for Vec<u8> {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Blob(v) => Ok(v.clone()),
            DbValue::Null => Err(DbError::conversion(
                "Vec<u8> field is NULL - use Option<Vec<u8>> for nullable columns",
            )),
            _ => Err(DbError::conversion("Expected blob")),
        }
    }
}
