//! Transient entity value objects.
//!
//! An [`Item`] is an identifier plus a generic attribute map; a [`Feature`]
//! is an item with one designated geometry attribute held as EWKT text.
//! Both are request-scoped: created by the repository or the caller, mutated
//! freely, no lifecycle beyond normal reclamation.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::core::value::{Row, SqlValue};
use crate::geometry;

/// A tabular entity: nullable identifier plus an attribute map.
///
/// The identifier column name is injected at construction. Once an
/// identifier is bound it lives outside the generic attribute map; setting
/// an attribute under the identifier column's name (in any case) binds the
/// identifier instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    id_column: String,
    id: Option<SqlValue>,
    attributes: BTreeMap<String, SqlValue>,
}

impl Item {
    pub fn new(id_column: impl Into<String>) -> Self {
        Self {
            id_column: id_column.into(),
            id: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Build an item from a result row, pulling the identifier out of the
    /// generic attribute map.
    pub fn from_row(id_column: &str, mut row: Row) -> Self {
        let id = row.take(id_column).filter(|v| !v.is_null());
        let mut item = Item::new(id_column);
        item.id = id;
        item.attributes = row.into_values();
        item
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn id(&self) -> Option<&SqlValue> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: impl Into<SqlValue>) {
        self.id = Some(id.into());
    }

    pub fn clear_id(&mut self) {
        self.id = None;
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        let name = name.into();
        if name.eq_ignore_ascii_case(&self.id_column) {
            self.id = Some(value.into());
        } else {
            self.attributes.insert(name, value.into());
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&SqlValue> {
        self.attributes.get(name)
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<SqlValue> {
        self.attributes.remove(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, SqlValue> {
        &self.attributes
    }

    /// Attribute map as owned values, for write preparation.
    pub fn attribute_values(&self) -> BTreeMap<String, SqlValue> {
        self.attributes.clone()
    }

    /// JSON rendering used for event payloads.
    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        map.insert(
            self.id_column.clone(),
            self.id.as_ref().map_or(JsonValue::Null, SqlValue::to_json),
        );
        for (name, value) in &self.attributes {
            map.insert(name.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }

    /// Replace attributes from a JSON object, skipping the identifier key.
    pub fn apply_json(&mut self, object: &JsonMap<String, JsonValue>) {
        for (name, value) in object {
            self.set_attribute(name.clone(), SqlValue::from_json(value));
        }
    }
}

/// An [`Item`] carrying one designated geometry attribute as EWKT text.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    item: Item,
    geometry_column: String,
    /// Internal storage is always EWKT when an SRID is resolvable.
    ewkt: Option<String>,
}

impl Feature {
    pub fn new(id_column: impl Into<String>, geometry_column: impl Into<String>) -> Self {
        Self {
            item: Item::new(id_column),
            geometry_column: geometry_column.into(),
            ewkt: None,
        }
    }

    /// Wrap an item, extracting its geometry attribute if present.
    pub fn from_item(mut item: Item, geometry_column: &str) -> Self {
        let ewkt = item
            .remove_attribute(geometry_column)
            .and_then(|v| v.as_str().map(str::to_string));
        Self {
            item,
            geometry_column: geometry_column.to_string(),
            ewkt,
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn item_mut(&mut self) -> &mut Item {
        &mut self.item
    }

    pub fn into_item(mut self) -> Item {
        if let Some(ewkt) = self.ewkt.take() {
            let column = self.geometry_column.clone();
            self.item.set_attribute(column, ewkt);
        }
        self.item
    }

    pub fn geometry_column(&self) -> &str {
        &self.geometry_column
    }

    pub fn id(&self) -> Option<&SqlValue> {
        self.item.id()
    }

    /// Set the geometry, normalizing to EWKT with the best-known SRID.
    ///
    /// An SRID already present in the input wins; otherwise `srid_hint`
    /// (typically the table's SRID) is attached; failing both, the plain
    /// WKT is kept as-is.
    pub fn set_geom(&mut self, wkt: &str, srid_hint: Option<i32>) {
        let normalized = match geometry::srid_of(wkt) {
            Some(_) => wkt.to_string(),
            None => match srid_hint {
                Some(srid) => geometry::with_srid(wkt, srid),
                None => wkt.to_string(),
            },
        };
        self.ewkt = Some(normalized);
    }

    /// The bare WKT, without any SRID prefix.
    pub fn geom(&self) -> Option<&str> {
        self.ewkt.as_deref().map(geometry::strip_srid)
    }

    /// The stored text exactly as held, EWKT when an SRID is known.
    pub fn ewkt(&self) -> Option<&str> {
        self.ewkt.as_deref()
    }

    pub fn srid(&self) -> Option<i32> {
        self.ewkt.as_deref().and_then(geometry::srid_of)
    }

    pub fn clear_geom(&mut self) {
        self.ewkt = None;
    }
}
