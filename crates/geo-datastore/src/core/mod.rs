//! Backend-agnostic core: SQL value types, table metadata and the driver
//! trait seams shared by every engine.

pub mod schema;
pub mod traits;
pub mod value;
