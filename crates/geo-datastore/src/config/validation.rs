//! Configuration validation.

use super::Config;
use crate::error::{Result, StoreError};

// Keep in sync with the type strings accepted by drivers::connect
const KNOWN_TYPES: [&str; 6] = [
    "postgres",
    "postgresql",
    "pg",
    "mssql",
    "sqlserver",
    "sqlite",
];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    for (name, conn) in &config.connections {
        if !KNOWN_TYPES.contains(&conn.r#type.as_str()) {
            return Err(StoreError::Config(format!(
                "connection '{}': unknown type '{}' (supported: postgres, mssql, sqlite)",
                name, conn.r#type
            )));
        }
        if conn.r#type == "sqlite" {
            if conn.path.is_empty() {
                return Err(StoreError::Config(format!(
                    "connection '{}': sqlite requires a path",
                    name
                )));
            }
        } else {
            if conn.host.is_empty() {
                return Err(StoreError::Config(format!(
                    "connection '{}': host is required",
                    name
                )));
            }
            if conn.database.is_empty() {
                return Err(StoreError::Config(format!(
                    "connection '{}': database is required",
                    name
                )));
            }
        }
        if conn.pool_size == 0 {
            return Err(StoreError::Config(format!(
                "connection '{}': pool_size must be at least 1",
                name
            )));
        }
    }

    for (name, repo) in &config.repositories {
        if repo.table.is_empty() {
            return Err(StoreError::Config(format!(
                "repository '{}': table is required",
                name
            )));
        }
        if repo.id_column.is_empty() {
            return Err(StoreError::Config(format!(
                "repository '{}': id_column must not be empty",
                name
            )));
        }
        if !config.connections.contains_key(&repo.connection) {
            return Err(StoreError::Config(format!(
                "repository '{}': unknown connection '{}'",
                name, repo.connection
            )));
        }
        if let Some(geometry) = &repo.geometry {
            if geometry.column.is_empty() {
                return Err(StoreError::Config(format!(
                    "repository '{}': geometry.column must not be empty",
                    name
                )));
            }
        }
    }

    Ok(())
}
