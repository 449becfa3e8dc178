//! PostgreSQL SQL dialect.
//!
//! Identifier quoting, placeholder style and the PostGIS geometry SQL
//! fragments. Pure string building; execution lives in the driver.

use crate::core::traits::Dialect;
use crate::core::value::{Condition, SqlValue};

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }

    /// SQL reading an EWKT text expression into a geometry.
    pub fn read_ewkt_sql(&self, expr: &str) -> String {
        format!("ST_GeomFromEWKT({})", expr)
    }

    /// SQL serializing a geometry expression to EWKT text.
    pub fn dump_wkt_sql(&self, expr: &str) -> String {
        format!("ST_AsEWKT({})", expr)
    }

    /// SQL reprojecting a geometry expression.
    pub fn transform_srid_sql(&self, expr: &str, target_srid: i32) -> String {
        format!("ST_Transform({}, {})", expr, target_srid)
    }

    /// SQL promoting a single geometry to its MULTI- equivalent.
    pub fn promote_to_collection_sql(&self, expr: &str) -> String {
        format!("ST_Multi({})", expr)
    }

    /// Intersection predicate; the WKT travels as a bound parameter.
    pub fn intersect_condition_sql(
        &self,
        column: &str,
        wkt: &str,
        wkt_srid: i32,
        column_srid: i32,
    ) -> Condition {
        Condition::new(
            format!(
                "ST_Intersects({}, ST_Transform(ST_GeomFromText(?, {}), {}))",
                self.quote_ident(column),
                wkt_srid,
                column_srid
            ),
            vec![SqlValue::Text(wkt.to_string())],
        )
    }

    /// Distance predicate; the anchor EWKT travels as a bound parameter.
    pub fn distance_condition_sql(
        &self,
        column: &str,
        source_ewkt: &str,
        distance: f64,
        column_srid: i32,
    ) -> Condition {
        Condition::new(
            format!(
                "ST_DWithin({}, ST_Transform(ST_GeomFromEWKT(?), {}), {})",
                self.quote_ident(column),
                column_srid,
                distance
            ),
            vec![SqlValue::Text(source_ewkt.to_string())],
        )
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        // Double quotes, with embedded quotes doubled
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }
}
