//! Record and Value types for FieldQL
//!
//! This module provides the stored shape of business records:
//! - RecordId: integer identifier of a record within its model
//! - Value: an enum covering scalars, temporal values, binary data and relation ids
//! - Record: a record with its field values

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a record within its model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Create a record ID
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw integer
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        Self(id as i64)
    }
}

/// Stored field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Unset value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    String(String),
    /// Binary payload (usually base64 text produced by the ORM)
    Binary(Vec<u8>),
    /// Calendar date
    Date(NaiveDate),
    /// Date and time without timezone
    DateTime(NaiveDateTime),
    /// Time of day
    Time(NaiveTime),
    /// Reference to a single related record
    Ref(RecordId),
    /// Ordered references to related records
    Refs(Vec<RecordId>),
}

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if value is a plain scalar (null, bool, number or text)
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_)
        )
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Short name of the value's shape, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::Time(_) => "time",
            Value::Ref(_) => "reference",
            Value::Refs(_) => "reference list",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Time(t)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::Ref(id)
    }
}

impl From<Vec<RecordId>> for Value {
    fn from(ids: Vec<RecordId>) -> Self {
        Value::Refs(ids)
    }
}

/// A stored record: identifier plus field values
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Record identifier
    pub id: RecordId,
    /// Field values keyed by field name
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Insert a field
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Get a field by name
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Check if a field is set
    pub fn contains_key(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_display() {
        let id = RecordId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.get(), 42);
    }

    #[test]
    fn test_value_conversions() {
        let v: Value = true.into();
        assert_eq!(v.as_bool(), Some(true));

        let v: Value = 42i32.into();
        assert_eq!(v.as_i64(), Some(42));
        assert_eq!(v.as_f64(), Some(42.0));

        let v: Value = "test".into();
        assert_eq!(v.as_str(), Some("test"));

        let v: Value = vec![RecordId::new(1), RecordId::new(2)].into();
        assert_eq!(v, Value::Refs(vec![RecordId::new(1), RecordId::new(2)]));
    }

    #[test]
    fn test_value_scalar_classification() {
        assert!(Value::Null.is_scalar());
        assert!(Value::Float(1.5).is_scalar());
        assert!(!Value::Binary(vec![1]).is_scalar());
        assert!(!Value::Ref(RecordId::new(1)).is_scalar());
        assert_eq!(Value::Refs(vec![]).type_name(), "reference list");
    }

    #[test]
    fn test_record_basic_operations() {
        let mut record = Record::new(1).with("name", "Alice");
        record.insert("age", 30i64);

        assert_eq!(record.get("name").and_then(Value::as_str), Some("Alice"));
        assert_eq!(record.get("age").and_then(Value::as_i64), Some(30));
        assert!(record.contains_key("name"));
        assert!(!record.contains_key("email"));
    }
}
