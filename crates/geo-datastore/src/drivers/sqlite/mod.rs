//! SQLite driver.
//!
//! The embedded file-based dialect: full CRUD against a local database
//! file, introspection via `PRAGMA table_info`, no native geometry support.

mod dialect;

pub use dialect::SqliteDialect;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Column as _, Row as _, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::core::schema::{Column, TableMetadata};
use crate::core::traits::{Dialect, Driver, MetadataLoader, SchemaDriver, SelectQuery};
use crate::core::value::{ChangeSet, IdPredicate, Row, SqlValue};
use crate::drivers::common;
use crate::error::{Result, StoreError};

type SqliteQuery<'a> =
    sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>;

fn bind_params<'a>(mut query: SqliteQuery<'a>, params: &'a [SqlValue]) -> SqliteQuery<'a> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Double(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Bytes(b) => query.bind(b.as_slice()),
            // No native types; stored as text
            SqlValue::Uuid(u) => query.bind(u.to_string()),
            SqlValue::Decimal(d) => query.bind(d.to_string()),
            SqlValue::DateTime(dt) => query.bind(*dt),
        };
    }
    query
}

/// Map a sqlx row to the generic row type using SQLite's storage classes.
fn map_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let is_null = raw.is_null();
        let type_name = raw.type_info().name().to_string();

        let value = if is_null {
            SqlValue::Null
        } else {
            match type_name.as_str() {
                "INTEGER" => SqlValue::Int(row.try_get::<i64, _>(idx)?),
                "REAL" => SqlValue::Double(row.try_get::<f64, _>(idx)?),
                "BLOB" => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(idx)?),
                "BOOLEAN" => SqlValue::Bool(row.try_get::<bool, _>(idx)?),
                _ => SqlValue::Text(row.try_get::<String, _>(idx)?),
            }
        };
        out.insert(column.name(), value);
    }
    Ok(out)
}

/// Whether a declared SQLite column type is numeric under its affinity rules.
fn is_numeric_type(declared: &str) -> bool {
    let upper = declared.to_ascii_uppercase();
    ["INT", "REAL", "NUMERIC", "DECIMAL", "DOUBLE", "FLOAT"]
        .iter()
        .any(|t| upper.contains(t))
}

/// SQLite driver backed by a sqlx connection pool.
pub struct SqliteDriver {
    pool: SqlitePool,
    dialect: SqliteDialect,
}

impl SqliteDriver {
    /// Open the database file and verify it with a probe query.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size as u32)
            .connect(&config.sqlite_url())
            .await
            .map_err(|e| StoreError::pool(e, "opening SQLite database"))?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        info!("Opened SQLite database: {}", config.path);

        Ok(Self {
            pool,
            dialect: SqliteDialect::new(),
        })
    }

    /// Wrap an already-built pool (e.g. an in-memory database).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            dialect: SqliteDialect::new(),
        }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect_name(&self) -> &str {
        self.dialect.name()
    }

    fn quote_ident(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    async fn insert(&self, table: &str, changes: &ChangeSet, _id_column: &str) -> Result<i64> {
        let (sql, params) = common::render_insert(&self.dialect, table, changes);
        debug!("insert: {}", sql);
        let result = bind_params(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update(&self, table: &str, changes: &ChangeSet, id: &IdPredicate) -> Result<u64> {
        let (sql, params) = common::render_update(&self.dialect, table, changes, id)?;
        debug!("update: {}", sql);
        let result = bind_params(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, id: &IdPredicate) -> Result<u64> {
        let (sql, params) = common::render_delete(&self.dialect, table, id);
        debug!("delete: {}", sql);
        let result = bind_params(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>> {
        let (sql, params) = common::render_select(&self.dialect, query);
        debug!("select: {}", sql);
        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_row).collect()
    }

    fn schema_manager(&self) -> Option<&dyn SchemaDriver> {
        Some(self)
    }
}

#[async_trait]
impl SchemaDriver for SqliteDriver {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create_table(&self, table: &str, id_column: &str) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY AUTOINCREMENT)",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(id_column)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.dialect.quote_ident(table));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataLoader for SqliteDriver {
    async fn load_table_meta(&self, table: &str) -> Result<TableMetadata> {
        // PRAGMA does not take bound parameters; the table name comes from
        // trusted configuration and is identifier-quoted.
        let sql = format!("PRAGMA table_info({})", self.dialect.quote_ident(table));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut meta = TableMetadata::new(table);
        for row in rows {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let has_default = !row.try_get_raw("dflt_value")?.is_null();
            let pk: i64 = row.try_get("pk")?;

            // An INTEGER PRIMARY KEY is a rowid alias: the engine assigns it
            let rowid_alias = pk == 1 && declared.eq_ignore_ascii_case("INTEGER");
            meta.add_column(
                name,
                Column::new(
                    not_null == 0,
                    has_default || rowid_alias,
                    is_numeric_type(&declared),
                ),
            );
        }

        if meta.is_empty() {
            return Err(StoreError::query_failed(
                "sqlite",
                format!("table '{}' has no columns or does not exist", table),
            ));
        }

        debug!("Loaded {} columns for {}", meta.len(), table);
        Ok(meta)
    }
}
