//! Configuration type definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Named database connections.
    pub connections: BTreeMap<String, ConnectionConfig>,

    /// Named repository definitions.
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

/// A database connection definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database type: "postgres", "mssql" or "sqlite".
    pub r#type: String,

    /// Database host (server engines).
    #[serde(default)]
    pub host: String,

    /// Database port; 0 selects the engine default.
    #[serde(default)]
    pub port: u16,

    /// Database name (server engines).
    #[serde(default)]
    pub database: String,

    /// Username (server engines).
    #[serde(default)]
    pub user: String,

    /// Password (server engines).
    #[serde(default)]
    pub password: String,

    /// Database file path (sqlite only).
    #[serde(default)]
    pub path: String,

    /// Encrypt the connection (mssql only).
    #[serde(default)]
    pub encrypt: bool,

    /// Trust the server certificate (mssql only).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Maximum pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl ConnectionConfig {
    /// Engine default port when none is configured.
    pub fn effective_port(&self) -> u16 {
        if self.port != 0 {
            return self.port;
        }
        match self.r#type.as_str() {
            "mssql" | "sqlserver" => 1433,
            _ => 5432,
        }
    }
}

/// A repository definition: one table, one identifier column, optionally
/// one geometry attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Name of the connection this repository runs against.
    pub connection: String,

    /// Table name.
    pub table: String,

    /// Identifier column (default: "id").
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Geometry attribute, when the entity carries one.
    #[serde(default)]
    pub geometry: Option<GeometrySpec>,
}

impl RepositoryConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            connection: String::new(),
            table: table.into(),
            id_column: default_id_column(),
            geometry: None,
        }
    }

    pub fn with_geometry(mut self, geometry: GeometrySpec) -> Self {
        self.geometry = Some(geometry);
        self
    }
}

/// Geometry column settings for a repository.
///
/// `srid` and `geometry_type` override the spatial catalog when set;
/// otherwise they are looked up once from the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometrySpec {
    /// Geometry column name.
    pub column: String,

    /// Declared SRID; looked up from the catalog when absent.
    #[serde(default)]
    pub srid: Option<i32>,

    /// Declared geometry type token; looked up when absent.
    #[serde(default)]
    pub geometry_type: Option<String>,

    /// Coordinate dimensions (default: 2).
    #[serde(default = "default_dims")]
    pub dims: i32,
}

impl GeometrySpec {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            srid: None,
            geometry_type: None,
            dims: default_dims(),
        }
    }

    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = Some(srid);
        self
    }

    pub fn with_type(mut self, geometry_type: impl Into<String>) -> Self {
        self.geometry_type = Some(geometry_type.into());
        self
    }
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_dims() -> i32 {
    2
}
