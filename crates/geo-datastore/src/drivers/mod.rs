//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL with PostGIS geometry support
//! - [`mssql`]: Microsoft SQL Server
//! - [`sqlite`]: embedded SQLite files
//! - [`common`]: shared statement rendering
//!
//! Each driver implements the core [`Driver`] and [`MetadataLoader`] traits;
//! optional capabilities ([`SpatialDriver`](crate::core::traits::SpatialDriver),
//! [`SchemaDriver`](crate::core::traits::SchemaDriver)) are feature-detected
//! through accessors rather than expressed as a type hierarchy.
//!
//! # Adding a new engine
//!
//! 1. Create a module under `drivers/` with a `dialect.rs` implementing
//!    [`Dialect`](crate::core::traits::Dialect)
//! 2. Implement `Driver` and `MetadataLoader` against the engine's pool
//! 3. Implement whichever capability traits the engine supports
//! 4. Register the type string in [`connect`]

pub mod common;
pub mod mssql;
pub mod postgres;
pub mod sqlite;

pub use mssql::{MssqlDialect, MssqlDriver};
pub use postgres::{PostgresDialect, PostgresDriver};
pub use sqlite::{SqliteDialect, SqliteDriver};

use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::core::traits::{Driver, MetadataLoader};
use crate::error::{Result, StoreError};

/// Connect a driver from a connection configuration.
///
/// Returns the same instance under both of its core trait facets.
pub async fn connect(
    config: &ConnectionConfig,
) -> Result<(Arc<dyn Driver>, Arc<dyn MetadataLoader>)> {
    match config.r#type.to_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => {
            let driver = Arc::new(PostgresDriver::connect(config).await?);
            Ok((driver.clone(), driver))
        }
        "mssql" | "sqlserver" | "sql_server" => {
            let driver = Arc::new(MssqlDriver::connect(config).await?);
            Ok((driver.clone(), driver))
        }
        "sqlite" => {
            let driver = Arc::new(SqliteDriver::connect(config).await?);
            Ok((driver.clone(), driver))
        }
        other => Err(StoreError::Config(format!(
            "Unknown database type: '{}'. Supported types: postgres, mssql, sqlite",
            other
        ))),
    }
}
