//! Microsoft SQL Server driver.
//!
//! The legacy enterprise dialect: full CRUD and schema management, no
//! native geometry support. The catalog stores identifiers in whatever
//! case the DDL used; the metadata alias index absorbs the difference.

mod dialect;

pub use dialect::MssqlDialect;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnType, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::core::schema::{Column, TableMetadata};
use crate::core::traits::{Dialect, Driver, MetadataLoader, SchemaDriver, SelectQuery};
use crate::core::value::{ChangeSet, IdPredicate, Row, SqlValue};
use crate::drivers::common;
use crate::error::{Result, StoreError};

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.effective_port());
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

fn to_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null => Box::new(Option::<String>::None),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::Int(i) => Box::new(*i),
        SqlValue::Double(f) => Box::new(*f),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
    }
}

/// Map one tiberius row to the generic row type, keyed by column name.
fn map_row(row: tiberius::Row) -> Result<Row> {
    let columns: Vec<(String, ColumnType)> = row
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), c.column_type()))
        .collect();

    let mut out = Row::new();
    for (idx, (name, ty)) in columns.iter().enumerate() {
        let value = extract_cell(&row, idx, *ty)?;
        out.insert(name.clone(), value);
    }
    Ok(out)
}

fn extract_cell(row: &tiberius::Row, idx: usize, ty: ColumnType) -> Result<SqlValue> {
    let value = match ty {
        ColumnType::Bit | ColumnType::Bitn => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        ColumnType::Int1 => row.try_get::<u8, _>(idx)?.map(|v| SqlValue::Int(v as i64)),
        ColumnType::Int2 => row.try_get::<i16, _>(idx)?.map(|v| SqlValue::Int(v as i64)),
        ColumnType::Int4 => row.try_get::<i32, _>(idx)?.map(|v| SqlValue::Int(v as i64)),
        ColumnType::Int8 => row.try_get::<i64, _>(idx)?.map(SqlValue::Int),
        ColumnType::Intn => {
            // Width depends on the stored value; try widest first
            if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
                Some(SqlValue::Int(v))
            } else if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
                Some(SqlValue::Int(v as i64))
            } else if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
                Some(SqlValue::Int(v as i64))
            } else {
                row.try_get::<u8, _>(idx)?.map(|v| SqlValue::Int(v as i64))
            }
        }
        ColumnType::Float4 => row
            .try_get::<f32, _>(idx)?
            .map(|v| SqlValue::Double(v as f64)),
        ColumnType::Float8 => row.try_get::<f64, _>(idx)?.map(SqlValue::Double),
        ColumnType::Floatn => {
            if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
                Some(SqlValue::Double(v))
            } else {
                row.try_get::<f32, _>(idx)?.map(|v| SqlValue::Double(v as f64))
            }
        }
        ColumnType::Decimaln | ColumnType::Numericn => {
            row.try_get::<Decimal, _>(idx)?.map(SqlValue::Decimal)
        }
        ColumnType::Guid => row.try_get::<Uuid, _>(idx)?.map(SqlValue::Uuid),
        ColumnType::BigBinary | ColumnType::BigVarBin | ColumnType::Image => row
            .try_get::<&[u8], _>(idx)?
            .map(|v| SqlValue::Bytes(v.to_vec())),
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2 => row
            .try_get::<NaiveDateTime, _>(idx)?
            .map(SqlValue::DateTime),
        ColumnType::Daten => row
            .try_get::<NaiveDate, _>(idx)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(SqlValue::DateTime),
        _ => row
            .try_get::<&str, _>(idx)?
            .map(|v| SqlValue::Text(v.to_string())),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// SQL Server driver backed by a bb8/tiberius connection pool.
pub struct MssqlDriver {
    pool: Pool<TiberiusConnectionManager>,
    dialect: MssqlDialect,
}

impl MssqlDriver {
    /// Connect and verify the pool with a probe query.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager {
            config: config.clone(),
        };
        let pool = Pool::builder()
            .max_size(config.pool_size as u32)
            .min_idle(Some(1))
            .build(manager)
            .await
            .map_err(|e| StoreError::pool(e, "creating MSSQL pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| StoreError::pool(e, "testing MSSQL connection"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL: {}:{}/{}",
            config.host,
            config.effective_port(),
            config.database
        );

        Ok(Self {
            pool,
            dialect: MssqlDialect::new(),
        })
    }

    async fn client(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::pool(e, "getting MSSQL connection"))
    }
}

#[async_trait]
impl Driver for MssqlDriver {
    fn dialect_name(&self) -> &str {
        self.dialect.name()
    }

    fn quote_ident(&self, name: &str) -> String {
        self.dialect.quote_ident(name)
    }

    async fn insert(&self, table: &str, changes: &ChangeSet, _id_column: &str) -> Result<i64> {
        let (sql, params) = common::render_insert(&self.dialect, table, changes);
        // Single batch so SCOPE_IDENTITY() sees the insert's scope
        let sql = format!("{}; SELECT CAST(SCOPE_IDENTITY() AS BIGINT)", sql);
        debug!("insert: {}", sql);

        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(to_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();

        let mut conn = self.client().await?;
        let results = conn.query(sql.as_str(), &refs).await?.into_results().await?;
        let id = results
            .iter()
            .rev()
            .find_map(|set| set.first())
            .and_then(|row| row.get::<i64, _>(0))
            .unwrap_or(0);
        Ok(id)
    }

    async fn update(&self, table: &str, changes: &ChangeSet, id: &IdPredicate) -> Result<u64> {
        let (sql, params) = common::render_update(&self.dialect, table, changes, id)?;
        debug!("update: {}", sql);

        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(to_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();

        let mut conn = self.client().await?;
        let result = conn.execute(sql.as_str(), &refs).await?;
        Ok(result.total())
    }

    async fn delete(&self, table: &str, id: &IdPredicate) -> Result<u64> {
        let (sql, params) = common::render_delete(&self.dialect, table, id);
        debug!("delete: {}", sql);

        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(to_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();

        let mut conn = self.client().await?;
        let result = conn.execute(sql.as_str(), &refs).await?;
        Ok(result.total())
    }

    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>> {
        let (sql, params) = common::render_select(&self.dialect, query);
        debug!("select: {}", sql);

        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(to_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();

        let mut conn = self.client().await?;
        let rows = conn
            .query(sql.as_str(), &refs)
            .await?
            .into_first_result()
            .await?;
        rows.into_iter().map(map_row).collect()
    }

    fn schema_manager(&self) -> Option<&dyn SchemaDriver> {
        Some(self)
    }
}

#[async_trait]
impl SchemaDriver for MssqlDriver {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut conn = self.client().await?;
        let row = conn
            .query(
                "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = @P1",
                &[&table],
            )
            .await?
            .into_row()
            .await?;
        Ok(row.and_then(|r| r.get::<i32, _>(0)).unwrap_or(0) > 0)
    }

    async fn create_table(&self, table: &str, id_column: &str) -> Result<()> {
        let quoted = self.dialect.quote_ident(table);
        let sql = format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {} ({} BIGINT IDENTITY(1,1) PRIMARY KEY)",
            table.replace('\'', "''"),
            quoted,
            self.dialect.quote_ident(id_column)
        );
        let mut conn = self.client().await?;
        conn.execute(sql.as_str(), &[]).await?;
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let sql = format!(
            "IF OBJECT_ID(N'{}', N'U') IS NOT NULL DROP TABLE {}",
            table.replace('\'', "''"),
            self.dialect.quote_ident(table)
        );
        let mut conn = self.client().await?;
        conn.execute(sql.as_str(), &[]).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataLoader for MssqlDriver {
    async fn load_table_meta(&self, table: &str) -> Result<TableMetadata> {
        // Identity columns count as having a database-side default: the
        // engine fills them, so insert preparation must not.
        let query = r#"
            SELECT
                COLUMN_NAME,
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
                CASE WHEN COLUMN_DEFAULT IS NOT NULL
                          OR ISNULL(COLUMNPROPERTY(OBJECT_ID(TABLE_SCHEMA + '.' + TABLE_NAME),
                                                   COLUMN_NAME, 'IsIdentity'), 0) = 1
                     THEN 1 ELSE 0 END,
                CASE WHEN DATA_TYPE IN ('int', 'bigint', 'smallint', 'tinyint',
                                        'decimal', 'numeric', 'float', 'real', 'money')
                     THEN 1 ELSE 0 END
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_NAME = @P1
            ORDER BY ORDINAL_POSITION
        "#;

        let mut conn = self.client().await?;
        let rows = conn
            .query(query, &[&table])
            .await?
            .into_first_result()
            .await?;

        let mut meta = TableMetadata::new(table);
        for row in rows {
            let name = row
                .get::<&str, _>(0)
                .ok_or_else(|| StoreError::query_failed("mssql", "NULL column name in catalog"))?
                .to_string();
            let nullable = row.get::<i32, _>(1).unwrap_or(0) == 1;
            let has_default = row.get::<i32, _>(2).unwrap_or(0) == 1;
            let is_numeric = row.get::<i32, _>(3).unwrap_or(0) == 1;
            meta.add_column(name, Column::new(nullable, has_default, is_numeric));
        }

        debug!("Loaded {} columns for {}", meta.len(), table);
        Ok(meta)
    }
}
