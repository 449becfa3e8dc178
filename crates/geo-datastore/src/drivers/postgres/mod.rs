//! PostgreSQL driver with PostGIS geometry support.
//!
//! The only driver implementing [`SpatialDriver`]: geometry columns,
//! EWKT read/dump fragments, SRID transforms and spatial predicates.

mod dialect;

pub use dialect::PostgresDialect;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::core::schema::{Column, TableMetadata};
use crate::core::traits::{
    Dialect, Driver, MetadataLoader, SchemaDriver, SelectQuery, SpatialDriver,
};
use crate::core::value::{ChangeSet, Condition, IdPredicate, Row, SqlValue};
use crate::drivers::common;
use crate::error::{Result, StoreError};

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            SqlValue::Int(i) => {
                // Coerce to the column's declared width; PostgreSQL is strict
                // about integer wire formats.
                if *ty == Type::INT2 {
                    (*i as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*i as i32).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::from(*i).to_sql(ty, out)
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    i.to_string().to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            SqlValue::Double(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::try_from(*f)?.to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            SqlValue::Text(s) => s.to_sql(ty, out),
            SqlValue::Bytes(b) => b.as_slice().to_sql(ty, out),
            SqlValue::Uuid(u) => u.to_sql(ty, out),
            SqlValue::Decimal(d) => d.to_sql(ty, out),
            SqlValue::DateTime(dt) => dt.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Map a tokio-postgres row to the generic row type by column type.
fn map_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?
                .map(|v| SqlValue::Int(v as i64))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?
                .map(|v| SqlValue::Int(v as i64))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)?
                .map(|v| SqlValue::Double(v as f64))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Double)
        } else if *ty == Type::NUMERIC {
            row.try_get::<_, Option<Decimal>>(idx)?.map(SqlValue::Decimal)
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<Uuid>>(idx)?.map(SqlValue::Uuid)
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SqlValue::Bytes)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(SqlValue::DateTime)
        } else if *ty == Type::DATE {
            row.try_get::<_, Option<NaiveDate>>(idx)?
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(SqlValue::DateTime)
        } else {
            row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
        };
        out.insert(column.name(), value.unwrap_or(SqlValue::Null));
    }
    Ok(out)
}

/// PostgreSQL driver backed by a deadpool connection pool.
pub struct PostgresDriver {
    pool: Pool,
    dialect: PostgresDialect,
}

impl PostgresDriver {
    /// Connect and verify the pool with a probe query.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.effective_port());
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| StoreError::pool(e, "creating PostgreSQL pool"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| StoreError::pool(e, "testing PostgreSQL connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host,
            config.effective_port(),
            config.database
        );

        Ok(Self {
            pool,
            dialect: PostgresDialect::new(),
        })
    }

    /// Wrap an already-built pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            dialect: PostgresDialect::new(),
        }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::pool(e, "getting PostgreSQL connection"))
    }

    fn param_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
        params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect_name(&self) -> &str {
        self.dialect.name()
    }

    fn quote_ident(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    async fn insert(&self, table: &str, changes: &ChangeSet, id_column: &str) -> Result<i64> {
        let (mut sql, params) = common::render_insert(&self.dialect, table, changes);
        sql.push_str(&format!(" RETURNING {}", self.dialect.quote_ident(id_column)));
        debug!("insert: {}", sql);

        let client = self.client().await?;
        let row = client.query_one(&sql, &Self::param_refs(&params)).await?;
        let id = map_row(&row)?
            .get(id_column)
            .and_then(SqlValue::as_i64)
            .unwrap_or(0);

        // A non-positive id means the reported value is not trustworthy;
        // re-read it from the identifier column's sequence.
        if id < 1 {
            let row = client
                .query_one(
                    "SELECT currval(pg_get_serial_sequence($1, $2))",
                    &[&table, &id_column],
                )
                .await?;
            return Ok(row.try_get::<_, i64>(0)?);
        }
        Ok(id)
    }

    async fn update(&self, table: &str, changes: &ChangeSet, id: &IdPredicate) -> Result<u64> {
        let (sql, params) = common::render_update(&self.dialect, table, changes, id)?;
        debug!("update: {}", sql);
        let client = self.client().await?;
        Ok(client.execute(&sql, &Self::param_refs(&params)).await?)
    }

    async fn delete(&self, table: &str, id: &IdPredicate) -> Result<u64> {
        let (sql, params) = common::render_delete(&self.dialect, table, id);
        debug!("delete: {}", sql);
        let client = self.client().await?;
        Ok(client.execute(&sql, &Self::param_refs(&params)).await?)
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>> {
        let (sql, params) = common::render_select(&self.dialect, query);
        debug!("select: {}", sql);
        let client = self.client().await?;
        let rows = client.query(&sql, &Self::param_refs(&params)).await?;
        rows.iter().map(map_row).collect()
    }

    fn spatial(&self) -> Option<&dyn SpatialDriver> {
        Some(self)
    }

    fn schema_manager(&self) -> Option<&dyn SchemaDriver> {
        Some(self)
    }
}

#[async_trait]
impl SpatialDriver for PostgresDriver {
    fn read_ewkt(&self, expr: &str) -> String {
        self.dialect.read_ewkt_sql(expr)
    }

    fn dump_wkt(&self, expr: &str) -> String {
        self.dialect.dump_wkt_sql(expr)
    }

    fn transform_srid(&self, expr: &str, target_srid: i32) -> String {
        self.dialect.transform_srid_sql(expr, target_srid)
    }

    fn promote_to_collection(&self, expr: &str) -> String {
        self.dialect.promote_to_collection_sql(expr)
    }

    fn intersect_condition(
        &self,
        column: &str,
        wkt: &str,
        wkt_srid: i32,
        column_srid: i32,
    ) -> Condition {
        self.dialect
            .intersect_condition_sql(column, wkt, wkt_srid, column_srid)
    }

    fn distance_condition(
        &self,
        column: &str,
        source_ewkt: &str,
        distance: f64,
        column_srid: i32,
    ) -> Condition {
        self.dialect
            .distance_condition_sql(column, source_ewkt, distance, column_srid)
    }

    async fn add_geometry_column(
        &self,
        table: &str,
        geometry_type: &str,
        srid: i32,
        column: &str,
        dims: i32,
    ) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "SELECT AddGeometryColumn($1, $2, $3, $4, $5)",
                &[&table, &column, &srid, &geometry_type, &dims],
            )
            .await?;
        info!(
            "Added geometry column {}.{} ({}, SRID {})",
            table, column, geometry_type, srid
        );
        Ok(())
    }

    async fn column_srid(&self, table: &str, column: &str) -> Result<Option<i32>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT srid FROM geometry_columns \
                 WHERE f_table_name = $1 AND f_geometry_column = $2",
                &[&table, &column],
            )
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<_, i32>(0)?),
            None => None,
        })
    }

    async fn column_geometry_type(&self, table: &str, column: &str) -> Result<Option<String>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT type FROM geometry_columns \
                 WHERE f_table_name = $1 AND f_geometry_column = $2",
                &[&table, &column],
            )
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get::<_, String>(0)?),
            None => None,
        })
    }
}

#[async_trait]
impl SchemaDriver for PostgresDriver {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1",
                &[&table],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn create_table(&self, table: &str, id_column: &str) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} BIGSERIAL PRIMARY KEY)",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(id_column)
        );
        let client = self.client().await?;
        client.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let sql = format!(
            "DROP TABLE IF EXISTS {}",
            self.dialect.quote_ident(table)
        );
        let client = self.client().await?;
        client.execute(&sql, &[]).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataLoader for PostgresDriver {
    async fn load_table_meta(&self, table: &str) -> Result<TableMetadata> {
        let query = r#"
            SELECT
                column_name,
                CASE WHEN is_nullable = 'YES' THEN true ELSE false END,
                column_default IS NOT NULL,
                CASE WHEN data_type IN
                    ('smallint', 'integer', 'bigint', 'numeric', 'decimal',
                     'real', 'double precision')
                THEN true ELSE false END
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
        "#;

        let client = self.client().await?;
        let rows = client.query(query, &[&table]).await?;

        let mut meta = TableMetadata::new(table);
        for row in rows {
            let name: String = row.try_get(0)?;
            meta.add_column(
                name,
                Column::new(row.try_get(1)?, row.try_get(2)?, row.try_get(3)?),
            );
        }

        debug!("Loaded {} columns for {}", meta.len(), table);
        Ok(meta)
    }
}
