//! SQL value types for database-agnostic change-sets and result rows.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Owned SQL value for type-safe parameter binding and row extraction.
///
/// Each driver converts these to its native parameter representation when
/// binding, and back when mapping result rows.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// True for an empty text value. Used by the metadata layer to spot
    /// cleared numeric form fields arriving as `""`.
    pub fn is_empty_text(&self) -> bool {
        matches!(self, SqlValue::Text(s) if s.is_empty())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Double(v) => Some(*v as i64),
            SqlValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON value into a SqlValue.
    ///
    /// Numbers become `Int` when they fit an i64, `Double` otherwise.
    /// Arrays and objects are carried as their JSON text rendering.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else {
                    SqlValue::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    /// Convert to a JSON value for event payloads and attribute maps.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Int(i) => JsonValue::from(*i),
            SqlValue::Double(f) => {
                serde_json::Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number)
            }
            SqlValue::Text(s) => JsonValue::String(s.clone()),
            SqlValue::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
                JsonValue::String(hex)
            }
            SqlValue::Uuid(u) => JsonValue::String(u.to_string()),
            SqlValue::Decimal(d) => JsonValue::String(d.to_string()),
            SqlValue::DateTime(dt) => JsonValue::String(dt.to_string()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Double(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

/// A change-set value: either raw SQL text rendered verbatim into the
/// statement, or a literal bound as a parameter.
///
/// This tagging is how server-side computed values (geometry constructors)
/// and literal scalars pass through one code path without string
/// concatenation of untrusted data. `Raw` fragments are built exclusively by
/// the drivers; any caller data inside them travels in `params` and is bound
/// through `?` markers in the fragment text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Raw { sql: String, params: Vec<SqlValue> },
    Bound(SqlValue),
}

impl SqlExpr {
    /// A raw SQL fragment with no bound parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        SqlExpr::Raw {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A raw SQL fragment whose `?` markers bind the given parameters.
    pub fn raw_with(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        SqlExpr::Raw {
            sql: sql.into(),
            params,
        }
    }

    pub fn bound(value: impl Into<SqlValue>) -> Self {
        SqlExpr::Bound(value.into())
    }
}

/// An ordered set of column changes for insert/update statements.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    entries: Vec<(String, SqlExpr)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, expr: SqlExpr) {
        self.entries.push((column.into(), expr));
    }

    pub fn push_bound(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.push(column, SqlExpr::Bound(value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(String, SqlExpr)] {
        &self.entries
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.entries.iter().any(|(c, _)| c == column)
    }

    /// Drop entries for the given column, case-insensitively. Used to keep
    /// identifier columns out of SET clauses.
    pub fn remove_column(&mut self, column: &str) {
        self.entries.retain(|(c, _)| !c.eq_ignore_ascii_case(column));
    }
}

impl FromIterator<(String, SqlExpr)> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = (String, SqlExpr)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A WHERE fragment with its bound parameters. `?` markers in `sql` are
/// rewritten to the dialect's positional placeholders at render time.
#[derive(Debug, Clone)]
pub struct Condition {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Condition {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A fragment with no bound parameters (trusted caller passthrough).
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Parameterized identifier equality, used for update/delete WHERE clauses.
/// Always bound, never rendered as raw text.
#[derive(Debug, Clone)]
pub struct IdPredicate {
    pub column: String,
    pub value: SqlValue,
}

impl IdPredicate {
    pub fn new(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// A generic result row keyed by real column name.
#[derive(Debug, Clone, Default)]
pub struct Row {
    values: BTreeMap<String, SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        self.values.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    pub fn take(&mut self, column: &str) -> Option<SqlValue> {
        self.values.remove(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &SqlValue)> {
        self.values.iter()
    }

    pub fn into_values(self) -> BTreeMap<String, SqlValue> {
        self.values
    }
}
