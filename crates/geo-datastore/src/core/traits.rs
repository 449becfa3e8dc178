//! Core traits for multi-backend entity storage.
//!
//! - [`Dialect`]: SQL syntax strategy for a database engine
//! - [`Driver`]: statement rendering and execution against a live pool
//! - [`SpatialDriver`]: optional geometry capability (PostGIS only)
//! - [`SchemaDriver`]: optional schema management capability
//! - [`MetadataLoader`]: dialect-specific column introspection
//!
//! Capabilities are feature-detected through accessor methods on [`Driver`]
//! rather than expressed as a subclass hierarchy; callers ask for
//! `driver.spatial()` and handle `None`.

use async_trait::async_trait;

use crate::core::schema::TableMetadata;
use crate::core::value::{ChangeSet, Condition, IdPredicate, Row, SqlValue};
use crate::error::Result;

/// SQL syntax strategy for a database engine.
///
/// Pure string building only; execution lives on [`Driver`].
pub trait Dialect: Send + Sync {
    /// Dialect identifier ("postgres", "mssql", "sqlite").
    fn name(&self) -> &str;

    /// Quote an identifier for this engine.
    fn quote_ident(&self, name: &str) -> String;

    /// Positional parameter placeholder for this engine (1-based).
    fn param_placeholder(&self, index: usize) -> String;

    /// Apply a row limit to a rendered SELECT statement.
    ///
    /// Default appends `LIMIT n`; engines without LIMIT override.
    fn apply_limit(&self, sql: String, limit: u64) -> String {
        format!("{} LIMIT {}", sql, limit)
    }
}

/// A column in a SELECT projection: either a plain column or a rendered
/// SQL expression with an alias (e.g. a geometry serializer).
#[derive(Debug, Clone)]
pub enum SelectColumn {
    Name(String),
    Expr { sql: String, alias: String },
}

/// A generic SELECT shape built by the repository and rendered per dialect.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub table: String,
    pub columns: Vec<SelectColumn>,
    pub conditions: Vec<Condition>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
    /// Render `SELECT COUNT(*)` instead of the projection.
    pub count_only: bool,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }
}

/// Statement rendering and execution for one database engine.
///
/// All execution failures surface with the engine's native error text; this
/// layer never retries. Transactions, timeouts and cancellation belong to
/// the connection gateway underneath.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Dialect identifier.
    fn dialect_name(&self) -> &str;

    /// Quote an identifier for this engine.
    fn quote_ident(&self, name: &str) -> String;

    /// Insert a change-set and return the generated identifier.
    async fn insert(&self, table: &str, changes: &ChangeSet, id_column: &str) -> Result<i64>;

    /// Apply a change-set to the row matched by the identifier predicate.
    ///
    /// Fails with [`StoreError::NoChanges`](crate::StoreError::NoChanges)
    /// when the change-set is empty after excluding identifier columns.
    async fn update(&self, table: &str, changes: &ChangeSet, id: &IdPredicate) -> Result<u64>;

    /// Delete the row matched by the identifier predicate.
    async fn delete(&self, table: &str, id: &IdPredicate) -> Result<u64>;

    /// Execute a SELECT shape and map rows to generic values.
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>>;

    /// Geometry capability, if this engine has one.
    fn spatial(&self) -> Option<&dyn SpatialDriver> {
        None
    }

    /// Schema management capability, if this engine has one.
    fn schema_manager(&self) -> Option<&dyn SchemaDriver> {
        None
    }
}

/// Geometry SQL capability. Only the PostGIS-backed driver implements this.
///
/// The fragment builders are pure: they compose SQL text around an inner
/// expression, with caller data travelling through `?` markers bound in the
/// accompanying parameter list.
#[async_trait]
pub trait SpatialDriver: Send + Sync {
    /// SQL reading an EWKT text expression into a geometry.
    fn read_ewkt(&self, expr: &str) -> String;

    /// SQL serializing a geometry expression to EWKT text.
    fn dump_wkt(&self, expr: &str) -> String;

    /// SQL reprojecting a geometry expression to a target SRID.
    fn transform_srid(&self, expr: &str, target_srid: i32) -> String;

    /// SQL promoting a single geometry to its MULTI- collection equivalent.
    fn promote_to_collection(&self, expr: &str) -> String;

    /// Spatial intersection predicate against a caller-supplied WKT.
    ///
    /// The WKT is bound as a parameter, read with `wkt_srid` and reprojected
    /// to the column's SRID.
    fn intersect_condition(
        &self,
        column: &str,
        wkt: &str,
        wkt_srid: i32,
        column_srid: i32,
    ) -> Condition;

    /// Distance predicate: rows within `distance` of an anchor geometry.
    fn distance_condition(
        &self,
        column: &str,
        source_ewkt: &str,
        distance: f64,
        column_srid: i32,
    ) -> Condition;

    /// Register a geometry column on a table.
    async fn add_geometry_column(
        &self,
        table: &str,
        geometry_type: &str,
        srid: i32,
        column: &str,
        dims: i32,
    ) -> Result<()>;

    /// Declared SRID of a geometry column, from the spatial catalog.
    async fn column_srid(&self, table: &str, column: &str) -> Result<Option<i32>>;

    /// Declared geometry type of a column, from the spatial catalog.
    async fn column_geometry_type(&self, table: &str, column: &str) -> Result<Option<String>>;
}

/// Schema management capability.
#[async_trait]
pub trait SchemaDriver: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create a table with just a generated identifier column.
    async fn create_table(&self, table: &str, id_column: &str) -> Result<()>;

    async fn drop_table(&self, table: &str) -> Result<()>;
}

/// Dialect-specific column introspection.
///
/// Loading is assumed expensive (a metadata query); callers cache the result
/// per table for their own lifetime.
#[async_trait]
pub trait MetadataLoader: Send + Sync {
    async fn load_table_meta(&self, table: &str) -> Result<TableMetadata>;
}

/// Convenience passthrough so a `SqlValue` can seed a bound condition.
pub fn bound_condition(sql: impl Into<String>, value: impl Into<SqlValue>) -> Condition {
    Condition {
        sql: sql.into(),
        params: vec![value.into()],
    }
}
