//! Table metadata used to safely coerce write payloads.
//!
//! Metadata is introspected once per table by a dialect's
//! [`MetadataLoader`](crate::core::traits::MetadataLoader) and cached by the
//! owning repository. Columns are immutable after construction.

use std::collections::BTreeMap;

use crate::core::value::SqlValue;
use crate::error::{Result, StoreError};

/// Per-column facts needed for safe value coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Whether the column carries a database-side default.
    pub has_default: bool,
    /// Whether the column has a numeric type.
    pub is_numeric: bool,
}

impl Column {
    pub fn new(nullable: bool, has_default: bool, is_numeric: bool) -> Self {
        Self {
            nullable,
            has_default,
            is_numeric,
        }
    }

    /// The value to substitute when a caller supplies nothing usable:
    /// NULL if nullable, else 0 for numeric columns, else empty string.
    pub fn safe_default(&self) -> SqlValue {
        if self.nullable {
            SqlValue::Null
        } else if self.is_numeric {
            SqlValue::Int(0)
        } else {
            SqlValue::Text(String::new())
        }
    }
}

/// Column metadata for one table, with a case-insensitive alias index.
///
/// Some engines upper-case unquoted identifiers in their catalogs while
/// callers address columns in whatever case their configuration uses; the
/// alias index reconciles the two.
#[derive(Debug, Clone, Default)]
pub struct TableMetadata {
    table: String,
    columns: BTreeMap<String, Column>,
    /// lowercased name -> real column name
    aliases: BTreeMap<String, String>,
}

impl TableMetadata {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Register a column under its real catalog name.
    pub fn add_column(&mut self, name: impl Into<String>, column: Column) {
        let name = name.into();
        self.aliases.insert(name.to_lowercase(), name.clone());
        self.columns.insert(name, column);
    }

    /// Resolve a column name case-insensitively to its real catalog name.
    pub fn resolve(&self, name: &str) -> Result<&str> {
        self.aliases
            .get(&name.to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.table.clone(),
                column: name.to_string(),
            })
    }

    /// Look up a column's metadata, resolving the name case-insensitively.
    pub fn get(&self, name: &str) -> Result<&Column> {
        let real = self.resolve(name)?;
        Ok(&self.columns[real])
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.aliases.contains_key(&name.to_lowercase())
    }

    /// Real column names, sorted by name.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Coerce an update payload: empty strings aimed at numeric columns are
    /// replaced with the column's safe default. UI layers emit `""` for
    /// cleared numeric fields; storing that would fail the write.
    ///
    /// Values naming unknown columns pass through untouched; statement
    /// rendering decides whether that is fatal.
    pub fn prepare_update_data(
        &self,
        values: BTreeMap<String, SqlValue>,
    ) -> BTreeMap<String, SqlValue> {
        values
            .into_iter()
            .map(|(name, value)| {
                let coerced = match self.get(&name) {
                    Ok(col) if value.is_empty_text() && col.is_numeric => col.safe_default(),
                    _ => value,
                };
                (name, coerced)
            })
            .collect()
    }

    /// Coerce an insert payload: apply the update rules, then inject a safe
    /// default for every column the caller omitted that has no database-side
    /// default. Columns with their own defaults are left to the database.
    pub fn prepare_insert_data(
        &self,
        values: BTreeMap<String, SqlValue>,
    ) -> BTreeMap<String, SqlValue> {
        let mut values = self.prepare_update_data(values);

        let provided: Vec<String> = values.keys().map(|k| k.to_lowercase()).collect();
        for (name, column) in &self.columns {
            if column.has_default || provided.contains(&name.to_lowercase()) {
                continue;
            }
            values.insert(name.clone(), column.safe_default());
        }

        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> TableMetadata {
        let mut m = TableMetadata::new("t");
        m.add_column("id", Column::new(false, true, true));
        m.add_column("UserName", Column::new(true, false, false));
        m.add_column("count", Column::new(false, false, true));
        m
    }

    #[test]
    fn test_safe_default_rules() {
        assert_eq!(Column::new(true, false, true).safe_default(), SqlValue::Null);
        assert_eq!(
            Column::new(false, false, true).safe_default(),
            SqlValue::Int(0)
        );
        assert_eq!(
            Column::new(false, false, false).safe_default(),
            SqlValue::Text(String::new())
        );
    }

    #[test]
    fn test_case_insensitive_resolve() {
        let m = meta();
        assert_eq!(m.resolve("username").unwrap(), "UserName");
        assert_eq!(m.resolve("USERNAME").unwrap(), "UserName");
        assert_eq!(m.resolve("UserName").unwrap(), "UserName");
    }

    #[test]
    fn test_column_names_sorted() {
        let m = meta();
        let names: Vec<&str> = m.column_names().collect();
        assert_eq!(names, vec!["UserName", "count", "id"]);
    }

    #[test]
    fn test_resolve_unknown_column() {
        let m = meta();
        let err = m.resolve("missing").unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }

    #[test]
    fn test_prepare_update_empty_numeric() {
        let m = meta();
        let mut values = BTreeMap::new();
        values.insert("count".to_string(), SqlValue::Text(String::new()));
        let out = m.prepare_update_data(values);
        assert_eq!(out["count"], SqlValue::Int(0));
    }

    #[test]
    fn test_prepare_update_empty_text_unchanged() {
        let m = meta();
        let mut values = BTreeMap::new();
        values.insert("UserName".to_string(), SqlValue::Text(String::new()));
        let out = m.prepare_update_data(values);
        assert_eq!(out["UserName"], SqlValue::Text(String::new()));
    }

    #[test]
    fn test_prepare_insert_fills_not_null_no_default() {
        // {a: not-null/no-default/numeric, b: nullable} and input {}
        let mut m = TableMetadata::new("t");
        m.add_column("a", Column::new(false, false, true));
        m.add_column("b", Column::new(true, false, false));
        let out = m.prepare_insert_data(BTreeMap::new());
        assert_eq!(out["a"], SqlValue::Int(0));
        // b is nullable so its safe default is NULL; either omitting it or
        // passing NULL is acceptable, but it must never become non-null.
        assert!(out.get("b").map_or(true, SqlValue::is_null));
    }

    #[test]
    fn test_prepare_insert_respects_db_default() {
        let m = meta();
        let out = m.prepare_insert_data(BTreeMap::new());
        // id has a database-side default (serial), never injected
        assert!(!out.contains_key("id"));
        assert_eq!(out["count"], SqlValue::Int(0));
    }

    #[test]
    fn test_prepare_insert_case_insensitive_presence() {
        let m = meta();
        let mut values = BTreeMap::new();
        values.insert("COUNT".to_string(), SqlValue::Int(7));
        let out = m.prepare_insert_data(values);
        // caller already provided the column under a different case
        assert_eq!(out["COUNT"], SqlValue::Int(7));
        assert!(!out.contains_key("count"));
    }
}
