//! # geo-datastore
//!
//! Multi-backend relational data access for tabular entities with optional
//! geometry attributes.
//!
//! One repository serves one table through a pluggable database driver:
//!
//! - **Dialect-correct SQL** for PostgreSQL, SQL Server and SQLite
//! - **Geometry round-tripping** as EWKT text, with SRID handling and
//!   reprojection through PostGIS
//! - **Runtime table introspection** driving safe write coercion and
//!   case-insensitive column addressing
//! - **Lifecycle hooks** around every write and search, with veto support
//! - **Criteria search** with spatial intersection and distance filters
//!
//! ## Example
//!
//! ```rust,no_run
//! use geo_datastore::{drivers, Config, Repository, SearchCriteria};
//!
//! #[tokio::main]
//! async fn main() -> geo_datastore::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let conn = &config.connections["main"];
//!     let (driver, loader) = drivers::connect(conn).await?;
//!
//!     let repo = Repository::new(driver, loader, config.repositories["wells"].clone())?;
//!     let mut feature = repo.new_feature()?;
//!     feature.item_mut().set_attribute("name", "well-7");
//!     feature.set_geom("POINT(9.18 48.78)", Some(4326));
//!     repo.save_feature(&mut feature).await?;
//!
//!     let nearby = repo
//!         .search_features(SearchCriteria::new().with_distance("POINT(9.18 48.78)", 500.0))
//!         .await?;
//!     println!("{} features nearby", nearby.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod entity;
pub mod error;
pub mod events;
pub mod geometry;
pub mod repository;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, GeometrySpec, RepositoryConfig};
pub use core::traits::{Dialect, Driver, MetadataLoader, SchemaDriver, SpatialDriver};
pub use core::value::{ChangeSet, Condition, IdPredicate, Row, SqlExpr, SqlValue};
pub use entity::{Feature, Item};
pub use error::{Result, StoreError};
pub use events::{HookEvent, HookPayload, HookRunner};
pub use repository::{Repository, SearchCriteria};
