//! SQL value and type vocabulary shared by dialects, indexes and queries.
//!
//! [`SqlValue`] is the transport form for statement parameters and result
//! cells; [`SqlType`] is the column-type vocabulary index declarations and
//! schema DDL are written in. Dialects map [`SqlType`] to backend type names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scalar value bound to a statement parameter or read from a result row.
///
/// Numeric and temporal values are normalized: all integers travel as
/// `BigInt` or `Int`, floating point and decimal values as `Double`, GUIDs
/// as their canonical text form.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    BigInt(i64),
    Int(i32),
    Bool(bool),
    Text(String),
    DateTime(DateTime<Utc>),
    Double(f64),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns the value as `i64` when it carries an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::BigInt(v) => Some(*v),
            SqlValue::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Returns the value as text when it carries a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a byte slice when it carries a blob.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as payload bytes: blobs directly, text as UTF-8.
    /// Backends differ in how they hand back binary columns.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) => Some(b),
            SqlValue::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Double(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

/// The column-type vocabulary understood by every dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    /// 64-bit signed integer.
    BigInt,
    /// 32-bit signed integer.
    Int,
    /// Boolean; stored as the backend's native boolean or a 0/1 integer.
    Bool,
    /// Variable-length string with a maximum length.
    VarChar(u16),
    /// Unbounded text.
    Text,
    /// Timestamp without timezone suffix; values are always UTC.
    DateTime,
    /// Globally unique identifier, transported in canonical text form.
    Guid,
    /// Binary payload.
    Blob,
    /// Fixed-point decimal with precision and scale.
    Decimal(u8, u8),
}

/// A single row read back from the executor, cells in select-list order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlRow(pub Vec<SqlValue>);

impl SqlRow {
    pub fn get(&self, ordinal: usize) -> &SqlValue {
        &self.0[ordinal]
    }

    pub fn i64(&self, ordinal: usize) -> Option<i64> {
        self.0.get(ordinal).and_then(SqlValue::as_i64)
    }

    pub fn text(&self, ordinal: usize) -> Option<&str> {
        self.0.get(ordinal).and_then(SqlValue::as_str)
    }

    pub fn blob(&self, ordinal: usize) -> Option<&[u8]> {
        self.0.get(ordinal).and_then(SqlValue::as_blob)
    }
}
