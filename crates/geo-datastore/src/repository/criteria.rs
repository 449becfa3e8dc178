//! Search criteria: a generic key/value configuration map with a handful of
//! recognized keys. Unrecognized keys are carried in `extra` and handed to
//! caller-registered filter extensions, so custom keys stay additive.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::core::value::Condition;
use crate::error::Result;

/// Recognized search criteria plus opaque passthrough keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchCriteria {
    /// Cap on returned rows.
    pub max_results: Option<u64>,

    /// Reproject returned geometries to this SRID.
    pub srid: Option<i32>,

    /// Intersection filter geometry, WKT or EWKT.
    pub intersect: Option<String>,

    /// Anchor geometry for the distance filter, WKT or EWKT.
    pub source: Option<String>,

    /// Distance filter radius, in column units.
    pub distance: Option<f64>,

    /// Trusted SQL passthrough fragment, appended as one more condition.
    pub where_clause: Option<String>,

    /// Additive custom keys, interpreted by registered filter extensions.
    #[serde(flatten)]
    pub extra: JsonMap<String, JsonValue>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse criteria from a generic JSON map.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    pub fn with_max_results(mut self, max_results: u64) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = Some(srid);
        self
    }

    pub fn with_intersect(mut self, wkt: impl Into<String>) -> Self {
        self.intersect = Some(wkt.into());
        self
    }

    pub fn with_distance(mut self, source_wkt: impl Into<String>, distance: f64) -> Self {
        self.source = Some(source_wkt.into());
        self.distance = Some(distance);
        self
    }

    pub fn with_where_clause(mut self, sql: impl Into<String>) -> Self {
        self.where_clause = Some(sql.into());
        self
    }
}

/// Caller-registered criteria extension: turns a criteria map into extra
/// WHERE conditions. Registered once per repository, applied to every search.
pub type CriteriaFilter = dyn Fn(&SearchCriteria) -> Vec<Condition> + Send + Sync;
