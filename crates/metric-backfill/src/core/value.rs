//! Store-agnostic row representation.
//!
//! Both source stores hand rows back as [`SqlRow`]s so packages can be written
//! (and tested) without depending on a particular driver's row type.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{BackfillError, Result};

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Integer list, bound as `bigint[]` for `= ANY($n)` lookups.
    I64List(Vec<i64>),
}

impl SqlValue {
    /// Integer view of the value. Floats with no fractional part and numeric
    /// strings are accepted because the columnar store may return either.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I64(v) => Some(*v),
            SqlValue::F64(v) if v.fract() == 0.0 => Some(*v as i64),
            SqlValue::Text(s) => s.parse().ok(),
            SqlValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamp view. Integers are read as unix epoch seconds; text is parsed
    /// as RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            SqlValue::Timestamp(ts) => Some(*ts),
            SqlValue::I64(secs) => Utc.timestamp_opt(*secs, 0).single(),
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
            _ => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<Vec<i64>> for SqlValue {
    fn from(v: Vec<i64>) -> Self {
        SqlValue::I64List(v)
    }
}

/// A row of named values. Column names are shared across all rows of one
/// result set.
#[derive(Debug, Clone)]
pub struct SqlRow {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, SqlValue)>,
        K: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<SqlValue>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named column.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Non-null integer column, or an error naming the column.
    pub fn i64(&self, column: &str) -> Result<i64> {
        self.get(column)
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| missing(column, "integer"))
    }

    /// Nullable integer column.
    pub fn opt_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    pub fn text(&self, column: &str) -> Result<&str> {
        self.get(column)
            .and_then(SqlValue::as_str)
            .ok_or_else(|| missing(column, "text"))
    }

    pub fn timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        self.get(column)
            .and_then(SqlValue::as_timestamp)
            .ok_or_else(|| missing(column, "timestamp"))
    }
}

fn missing(column: &str, kind: &str) -> BackfillError {
    BackfillError::Row(format!("row has no {} value for column '{}'", kind, column))
}
