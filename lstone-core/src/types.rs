use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Version identifier - strictly increasing from 0
pub type VersionId = i64;

/// Record identifier (0 = assign next available on commit)
pub type RecordId = i64;

/// Attribute names used by the workout record layout
pub const ID_FIELD: &str = "id";
pub const NAME_FIELD: &str = "name";
pub const TYPE_FIELD: &str = "type";
pub const DURATION_FIELD: &str = "duration";
pub const CALORIES_FIELD: &str = "calories";
pub const DATE_FIELD: &str = "date";
pub const DESCRIPTION_FIELD: &str = "description";

/// Typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// String
    S(String),
    /// Timestamp (UTC)
    Ts(DateTime<Utc>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::S(s.into())
    }

    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    pub fn float(f: f64) -> Self {
        Value::Float(f)
    }

    pub fn timestamp(ts: DateTime<Utc>) -> Self {
        Value::Ts(ts)
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view of Int and Float values
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Ts(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or a string that is empty after trimming
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::S(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// Stable string rendering. Sorting compares these renderings.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::S(s) => f.write_str(s),
            Value::Ts(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::S(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::S(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Ts(ts)
    }
}

/// Attribute map of a record (ordered for deterministic snapshots)
pub type Attributes = BTreeMap<String, Value>;

/// A typed row: identifier plus domain attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Record {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(id: RecordId, attributes: Attributes) -> Self {
        Self { id, attributes }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Field lookup that also resolves the identifier as `id`
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == ID_FIELD {
            return Some(Value::Int(self.id));
        }
        self.attributes.get(name).cloned()
    }

    pub fn name(&self) -> Option<&str> {
        self.get(NAME_FIELD).and_then(Value::as_string)
    }

    pub fn record_type(&self) -> Option<&str> {
        self.get(TYPE_FIELD).and_then(Value::as_string)
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.get(DATE_FIELD).and_then(Value::as_timestamp)
    }
}

/// CRC32C checksum helpers (hardware-accelerated when available)
pub mod checksum {
    /// Compute CRC32C checksum of data
    pub fn compute(data: &[u8]) -> u32 {
        crc32c::crc32c(data)
    }

    /// Verify CRC32C checksum
    pub fn verify(data: &[u8], expected: u32) -> bool {
        crc32c::crc32c(data) == expected
    }
}
