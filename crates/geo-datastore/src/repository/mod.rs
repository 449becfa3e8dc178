//! Entity repository: CRUD and filtered search against a driver.
//!
//! The repository owns identifier semantics, normalizes change-sets through
//! the table metadata, converts geometry attributes through the driver's
//! spatial capability, and fires lifecycle hooks around every write.
//!
//! One repository serves one table. Metadata is introspected lazily on
//! first use and cached single-flight for the repository's lifetime; a
//! discarded repository drops its cache.

mod criteria;

pub use criteria::{CriteriaFilter, SearchCriteria};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::RepositoryConfig;
use crate::core::schema::TableMetadata;
use crate::core::traits::{Driver, MetadataLoader, SelectColumn, SelectQuery};
use crate::core::value::{ChangeSet, Condition, IdPredicate, SqlExpr, SqlValue};
use crate::entity::{Feature, Item};
use crate::events::{HookEvent, HookPayload, HookRunner};
use crate::geometry;
use crate::error::{Result, StoreError};

/// Resolved geometry column facts: configuration overrides merged with the
/// spatial catalog, looked up once.
#[derive(Debug, Clone)]
struct GeometryInfo {
    column: String,
    srid: Option<i32>,
    geometry_type: Option<String>,
}

/// Repository over one table, optionally geometry-bearing.
pub struct Repository {
    driver: Arc<dyn Driver>,
    loader: Arc<dyn MetadataLoader>,
    hooks: Option<Arc<dyn HookRunner>>,
    config: RepositoryConfig,
    meta: OnceCell<Arc<TableMetadata>>,
    geometry: OnceCell<Option<GeometryInfo>>,
    filters: Vec<Box<CriteriaFilter>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Construct a repository. An empty table name is fatal here, not at
    /// first use.
    pub fn new(
        driver: Arc<dyn Driver>,
        loader: Arc<dyn MetadataLoader>,
        config: RepositoryConfig,
    ) -> Result<Self> {
        if config.table.is_empty() {
            return Err(StoreError::Config("repository table must not be empty".into()));
        }
        if config.id_column.is_empty() {
            return Err(StoreError::Config(
                "repository id_column must not be empty".into(),
            ));
        }
        Ok(Self {
            driver,
            loader,
            hooks: None,
            config,
            meta: OnceCell::new(),
            geometry: OnceCell::new(),
            filters: Vec::new(),
        })
    }

    /// Attach an event hook runner.
    pub fn with_hooks(mut self, hooks: Arc<dyn HookRunner>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Register a criteria filter extension, applied to every search.
    pub fn add_filter(
        &mut self,
        filter: impl Fn(&SearchCriteria) -> Vec<Condition> + Send + Sync + 'static,
    ) {
        self.filters.push(Box::new(filter));
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    pub fn id_column(&self) -> &str {
        &self.config.id_column
    }

    /// A blank item bound to this repository's identifier column.
    pub fn new_item(&self) -> Item {
        Item::new(&self.config.id_column)
    }

    /// A blank feature bound to this repository's identifier and geometry
    /// columns. Errors when the repository has no geometry configured.
    pub fn new_feature(&self) -> Result<Feature> {
        let spec = self.config.geometry.as_ref().ok_or_else(|| {
            StoreError::Config(format!(
                "repository for '{}' has no geometry column configured",
                self.config.table
            ))
        })?;
        Ok(Feature::new(&self.config.id_column, &spec.column))
    }

    /// Table metadata, introspected on first use. The load is single-flight:
    /// concurrent first callers share one introspection query.
    async fn meta(&self) -> Result<Arc<TableMetadata>> {
        let meta = self
            .meta
            .get_or_try_init(|| async {
                self.loader
                    .load_table_meta(&self.config.table)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(meta.clone())
    }

    /// Geometry column facts, resolved once from configuration overrides
    /// and the spatial catalog.
    async fn geometry_info(&self) -> Result<Option<GeometryInfo>> {
        let info = self
            .geometry
            .get_or_try_init(|| async {
                let Some(spec) = &self.config.geometry else {
                    return Ok::<_, StoreError>(None);
                };
                let mut srid = spec.srid;
                let mut geometry_type = spec.geometry_type.clone();
                if let Some(spatial) = self.driver.spatial() {
                    if srid.is_none() {
                        srid = spatial
                            .column_srid(&self.config.table, &spec.column)
                            .await?;
                    }
                    if geometry_type.is_none() {
                        geometry_type = spatial
                            .column_geometry_type(&self.config.table, &spec.column)
                            .await?;
                    }
                }
                Ok(Some(GeometryInfo {
                    column: spec.column.clone(),
                    srid,
                    geometry_type,
                }))
            })
            .await?;
        Ok(info.clone())
    }

    /// Create the table and geometry column if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        let schema = self.driver.schema_manager().ok_or(StoreError::NotImplemented(
            "schema management is not supported by this driver",
        ))?;

        if !schema.table_exists(&self.config.table).await? {
            schema
                .create_table(&self.config.table, &self.config.id_column)
                .await?;
        }

        if let (Some(spec), Some(spatial)) = (&self.config.geometry, self.driver.spatial()) {
            if spatial
                .column_srid(&self.config.table, &spec.column)
                .await?
                .is_none()
            {
                let srid = spec.srid.ok_or_else(|| {
                    StoreError::Config(
                        "geometry.srid is required to create a geometry column".into(),
                    )
                })?;
                let geometry_type = spec.geometry_type.as_deref().unwrap_or("GEOMETRY");
                spatial
                    .add_geometry_column(
                        &self.config.table,
                        geometry_type,
                        srid,
                        &spec.column,
                        spec.dims,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    // === writes ===

    /// Insert an item and bind its generated identifier.
    pub async fn insert(&self, item: &mut Item) -> Result<()> {
        self.execute_insert(item, None).await
    }

    /// Update an item by its bound identifier.
    pub async fn update(&self, item: &mut Item) -> Result<u64> {
        self.execute_update(item, None).await
    }

    /// Insert or update depending on identifier presence.
    pub async fn save(&self, item: &mut Item) -> Result<()> {
        let original = item.to_json();
        let (payload, allowed) = self
            .run_pre_hook(HookEvent::BeforeSave, HookEvent::AfterSave, || {
                self.base_payload().with("item", original.clone())
            })
            .await?;

        if allowed {
            if item.id().is_some() {
                self.execute_update(item, None).await?;
            } else {
                self.execute_insert(item, None).await?;
            }
        }

        let payload = self.run_post_hook(HookEvent::AfterSave, payload).await?;
        if let Some(payload) = &payload {
            self.apply_item_mutations(item, &original, payload);
        }
        Ok(())
    }

    /// Insert or update a feature, writing its geometry through the
    /// driver's spatial SQL when the driver has that capability.
    pub async fn save_feature(&self, feature: &mut Feature) -> Result<()> {
        let geometry_change = self.geometry_change(feature).await?;
        if feature.id().is_some() {
            self.execute_update(feature.item_mut(), geometry_change)
                .await?;
        } else {
            self.execute_insert(feature.item_mut(), geometry_change)
                .await?;
        }
        Ok(())
    }

    /// Delete by identifier. A registered before-remove hook may veto.
    pub async fn remove(&self, id: impl Into<SqlValue>) -> Result<u64> {
        let id = id.into();
        let (payload, allowed) = self
            .run_pre_hook(HookEvent::BeforeRemove, HookEvent::AfterRemove, || {
                self.base_payload().with("id", id.to_json())
            })
            .await?;

        let mut affected = 0;
        if allowed {
            let meta = self.meta().await?;
            let id_column = meta.resolve(&self.config.id_column)?.to_string();
            affected = self
                .driver
                .delete(&self.config.table, &IdPredicate::new(id_column, id))
                .await?;
        }

        self.run_post_hook(HookEvent::AfterRemove, payload).await?;
        Ok(affected)
    }

    // === reads ===

    /// Single-row lookup by identifier equality; `None` when no row matches.
    pub async fn get_by_id(
        &self,
        id: impl Into<SqlValue>,
        srid: Option<i32>,
    ) -> Result<Option<Item>> {
        let meta = self.meta().await?;
        let info = self.geometry_info().await?;
        let id_column = meta.resolve(&self.config.id_column)?.to_string();

        let mut query = SelectQuery::new(&self.config.table);
        query.columns = self.select_columns(&meta, info.as_ref(), srid);
        query.conditions = vec![Condition::new(
            format!("{} = ?", self.driver.quote_ident(&id_column)),
            vec![id.into()],
        )];
        query.limit = Some(1);

        let mut rows = self.driver.select(&query).await?;
        let first = rows
            .drain(..)
            .next()
            .map(|row| Item::from_row(&id_column, row));
        Ok(first)
    }

    /// [`get_by_id`](Self::get_by_id) with the geometry attribute split out.
    pub async fn get_feature_by_id(
        &self,
        id: impl Into<SqlValue>,
        srid: Option<i32>,
    ) -> Result<Option<Feature>> {
        let info = self.geometry_info().await?;
        let column = info
            .as_ref()
            .map(|i| i.column.clone())
            .ok_or_else(|| {
                StoreError::Config(format!(
                    "repository for '{}' has no geometry column configured",
                    self.config.table
                ))
            })?;
        Ok(self
            .get_by_id(id, srid)
            .await?
            .map(|item| Feature::from_item(item, &column)))
    }

    /// Filtered search. Recognized criteria keys are applied here; custom
    /// keys go through registered filter extensions.
    pub async fn search(&self, criteria: SearchCriteria) -> Result<Vec<Item>> {
        let (mut payload, allowed) = self
            .run_pre_hook(HookEvent::BeforeSearch, HookEvent::AfterSearch, || {
                self.base_payload().with("criteria", criteria.to_json())
            })
            .await?;

        if !allowed {
            self.run_post_hook(HookEvent::AfterSearch, payload).await?;
            return Ok(Vec::new());
        }

        // A before-search hook may rewrite the criteria in the payload
        let criteria = match payload
            .as_ref()
            .and_then(|p| p.get("criteria"))
        {
            Some(value) => SearchCriteria::from_json(value)?,
            None => criteria,
        };

        let meta = self.meta().await?;
        let info = self.geometry_info().await?;
        let id_column = meta.resolve(&self.config.id_column)?.to_string();

        let mut query = SelectQuery::new(&self.config.table);
        query.columns = self.select_columns(&meta, info.as_ref(), criteria.srid);
        query.conditions = self.build_conditions(&criteria, info.as_ref())?;
        query.limit = criteria.max_results;

        let rows = self.driver.select(&query).await?;
        let items: Vec<Item> = rows
            .into_iter()
            .map(|row| Item::from_row(&id_column, row))
            .collect();

        if let Some(p) = payload.as_mut() {
            p.fields
                .insert("count".into(), JsonValue::from(items.len()));
        }
        self.run_post_hook(HookEvent::AfterSearch, payload).await?;
        Ok(items)
    }

    /// [`search`](Self::search) with the geometry attribute split out.
    pub async fn search_features(&self, criteria: SearchCriteria) -> Result<Vec<Feature>> {
        let info = self.geometry_info().await?;
        let column = info
            .as_ref()
            .map(|i| i.column.clone())
            .ok_or_else(|| {
                StoreError::Config(format!(
                    "repository for '{}' has no geometry column configured",
                    self.config.table
                ))
            })?;
        Ok(self
            .search(criteria)
            .await?
            .into_iter()
            .map(|item| Feature::from_item(item, &column))
            .collect())
    }

    /// Count rows matching the criteria, through the same condition
    /// pipeline as [`search`](Self::search).
    pub async fn count(&self, criteria: &SearchCriteria) -> Result<i64> {
        let info = self.geometry_info().await?;
        let mut query = SelectQuery::new(&self.config.table);
        query.conditions = self.build_conditions(criteria, info.as_ref())?;
        query.count_only = true;

        let rows = self.driver.select(&query).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("cnt"))
            .and_then(SqlValue::as_i64)
            .unwrap_or(0))
    }

    /// Parent lookup is intentionally unimplemented; the legacy behavior of
    /// returning a blank entity hid the missing functionality.
    pub fn parent(&self, _item: &Item) -> Result<Item> {
        Err(StoreError::NotImplemented("parent entity lookup"))
    }

    /// Child lookup is intentionally unimplemented, same as [`parent`](Self::parent).
    pub fn children(&self, _item: &Item) -> Result<Vec<Item>> {
        Err(StoreError::NotImplemented("child entity lookup"))
    }

    // === internals ===

    fn base_payload(&self) -> HookPayload {
        HookPayload::new()
            .with("table", JsonValue::String(self.config.table.clone()))
            .with(
                "id_column",
                JsonValue::String(self.config.id_column.clone()),
            )
            .with(
                "connection",
                JsonValue::String(self.driver.dialect_name().to_string()),
            )
    }

    /// Build and run the pre-hook for an operation. Returns the payload
    /// (present when either hook is registered) and whether execution is
    /// allowed to proceed.
    async fn run_pre_hook(
        &self,
        pre: HookEvent,
        post: HookEvent,
        build: impl FnOnce() -> HookPayload,
    ) -> Result<(Option<HookPayload>, bool)> {
        let Some(hooks) = &self.hooks else {
            return Ok((None, true));
        };
        if !hooks.handles(pre) && !hooks.handles(post) {
            return Ok((None, true));
        }
        let mut payload = build();
        if hooks.handles(pre) {
            hooks.run(pre, &mut payload).await?;
        }
        let allowed = payload.allow_update;
        Ok((Some(payload), allowed))
    }

    /// Run the post-hook with the payload from the pre-hook. A vetoed write
    /// still reaches its post-hook, with the same payload. Returns the
    /// payload so callers can fold hook mutations back into the entity.
    async fn run_post_hook(
        &self,
        post: HookEvent,
        payload: Option<HookPayload>,
    ) -> Result<Option<HookPayload>> {
        if let (Some(hooks), Some(mut payload)) = (&self.hooks, payload) {
            if hooks.handles(post) {
                hooks.run(post, &mut payload).await?;
            }
            return Ok(Some(payload));
        }
        Ok(None)
    }

    /// Fold hook mutations of the payload's entity rendering back into the
    /// entity. Only keys a hook actually changed are applied, so typed
    /// attributes never degrade through an identity JSON round-trip. The
    /// identifier key is never taken from the payload.
    fn apply_item_mutations(&self, item: &mut Item, original: &JsonValue, payload: &HookPayload) {
        let Some(JsonValue::Object(after)) = payload.get("item") else {
            return;
        };
        let JsonValue::Object(before) = original else {
            return;
        };
        for (name, value) in after {
            if name.eq_ignore_ascii_case(&self.config.id_column) {
                continue;
            }
            if before.get(name) != Some(value) {
                item.set_attribute(name.clone(), SqlValue::from_json(value));
            }
        }
    }

    async fn execute_insert(
        &self,
        item: &mut Item,
        geometry_change: Option<(String, SqlExpr)>,
    ) -> Result<()> {
        let meta = self.meta().await?;
        let mut values = meta.prepare_insert_data(item.attribute_values());
        if let Some((column, _)) = &geometry_change {
            values.retain(|name, _| !name.eq_ignore_ascii_case(column));
        }

        let original = item.to_json();
        let (mut payload, allowed) = self
            .run_pre_hook(HookEvent::BeforeInsert, HookEvent::AfterInsert, || {
                self.base_payload()
                    .with("item", original.clone())
                    .with("values", values_to_json(&values))
                    // no previous state exists for an insert
                    .with("previous", self.new_item().to_json())
            })
            .await?;

        if allowed {
            // The hook may have rewritten the proposed values
            if let Some(JsonValue::Object(obj)) =
                payload.as_ref().and_then(|p| p.get("values"))
            {
                values = json_to_values(obj);
            }
            let changes = self.build_change_set(&meta, values, geometry_change)?;
            let id = self
                .driver
                .insert(&self.config.table, &changes, &self.config.id_column)
                .await?;
            item.set_id(id);
            if let Some(p) = payload.as_mut() {
                p.fields.insert("id".into(), JsonValue::from(id));
            }
        }

        let payload = self.run_post_hook(HookEvent::AfterInsert, payload).await?;
        if let Some(payload) = &payload {
            self.apply_item_mutations(item, &original, payload);
        }
        Ok(())
    }

    async fn execute_update(
        &self,
        item: &mut Item,
        geometry_change: Option<(String, SqlExpr)>,
    ) -> Result<u64> {
        let id = item.id().cloned().ok_or_else(|| {
            StoreError::Config("cannot update an item without a bound identifier".into())
        })?;

        let meta = self.meta().await?;
        let mut values = meta.prepare_update_data(item.attribute_values());
        if let Some((column, _)) = &geometry_change {
            values.retain(|name, _| !name.eq_ignore_ascii_case(column));
        }

        let previous = if self.hooks.as_ref().map_or(false, |h| {
            h.handles(HookEvent::BeforeUpdate) || h.handles(HookEvent::AfterUpdate)
        }) {
            // previously persisted snapshot, for the event payload
            self.get_by_id(id.clone(), None)
                .await?
                .unwrap_or_else(|| self.new_item())
        } else {
            self.new_item()
        };

        let original = item.to_json();
        let (payload, allowed) = self
            .run_pre_hook(HookEvent::BeforeUpdate, HookEvent::AfterUpdate, || {
                self.base_payload()
                    .with("item", original.clone())
                    .with("values", values_to_json(&values))
                    .with("previous", previous.to_json())
            })
            .await?;

        let mut affected = 0;
        if allowed {
            if let Some(JsonValue::Object(obj)) =
                payload.as_ref().and_then(|p| p.get("values"))
            {
                values = json_to_values(obj);
            }
            let changes = self.build_change_set(&meta, values, geometry_change)?;
            let id_column = meta.resolve(&self.config.id_column)?.to_string();
            affected = self
                .driver
                .update(
                    &self.config.table,
                    &changes,
                    &IdPredicate::new(id_column, id),
                )
                .await?;
        }

        let payload = self.run_post_hook(HookEvent::AfterUpdate, payload).await?;
        if let Some(payload) = &payload {
            self.apply_item_mutations(item, &original, payload);
        }
        Ok(affected)
    }

    /// Build the change-set for a write: known columns become bound values
    /// under their real catalog names, the identifier column stays out, and
    /// attributes with no matching column are dropped.
    fn build_change_set(
        &self,
        meta: &TableMetadata,
        values: BTreeMap<String, SqlValue>,
        geometry_change: Option<(String, SqlExpr)>,
    ) -> Result<ChangeSet> {
        let mut changes = ChangeSet::new();
        for (name, value) in values {
            match meta.resolve(&name) {
                Ok(real) if real.eq_ignore_ascii_case(&self.config.id_column) => {}
                Ok(real) => changes.push(real.to_string(), SqlExpr::Bound(value)),
                Err(_) => {
                    debug!(
                        "dropping attribute '{}' with no column in table '{}'",
                        name, self.config.table
                    );
                }
            }
        }
        if let Some((column, expr)) = geometry_change {
            let real = meta
                .resolve(&column)
                .map(str::to_string)
                .unwrap_or(column);
            changes.push(real, expr);
        }
        Ok(changes)
    }

    /// Turn a feature's stored EWKT into a change-set entry.
    ///
    /// Degenerate input (NaN coordinates, no type token) is replaced with an
    /// empty-point placeholder for the table's SRID instead of failing the
    /// write. That substitution is legacy compatibility behavior; new
    /// callers should validate geometry before saving.
    async fn geometry_change(&self, feature: &Feature) -> Result<Option<(String, SqlExpr)>> {
        let Some(info) = self.geometry_info().await? else {
            return Ok(None);
        };
        let Some(raw) = feature.ewkt() else {
            return Ok(None);
        };

        let ewkt = if geometry::is_degenerate(raw) {
            warn!(
                "degenerate geometry '{}' for table '{}', substituting empty point",
                raw, self.config.table
            );
            match info.srid {
                Some(srid) => geometry::with_srid(geometry::EMPTY_POINT_WKT, srid),
                None => geometry::EMPTY_POINT_WKT.to_string(),
            }
        } else if geometry::srid_of(raw).is_none() {
            match info.srid {
                Some(srid) => geometry::with_srid(raw, srid),
                None => raw.to_string(),
            }
        } else {
            raw.to_string()
        };

        let Some(spatial) = self.driver.spatial() else {
            // No native geometry support: the EWKT is stored as plain text
            return Ok(Some((info.column, SqlExpr::Bound(SqlValue::Text(ewkt)))));
        };

        let mut sql = spatial.read_ewkt("?");
        if let Some(srid) = info.srid {
            sql = spatial.transform_srid(&sql, srid);
        }
        if let Some(declared) = &info.geometry_type {
            if geometry::needs_collection_promotion(declared, &ewkt) {
                sql = spatial.promote_to_collection(&sql);
            }
        }
        Ok(Some((
            info.column,
            SqlExpr::raw_with(sql, vec![SqlValue::Text(ewkt)]),
        )))
    }

    /// Projection for reads: every real column, with the geometry column
    /// rendered through the spatial dump (and reprojected when requested).
    fn select_columns(
        &self,
        meta: &TableMetadata,
        info: Option<&GeometryInfo>,
        srid_override: Option<i32>,
    ) -> Vec<SelectColumn> {
        meta.column_names()
            .map(|name| {
                let geometry = info.filter(|i| i.column.eq_ignore_ascii_case(name));
                match (geometry, self.driver.spatial()) {
                    (Some(_), Some(spatial)) => {
                        let mut expr = self.driver.quote_ident(name);
                        if let Some(srid) = srid_override {
                            expr = spatial.transform_srid(&expr, srid);
                        }
                        SelectColumn::Expr {
                            sql: spatial.dump_wkt(&expr),
                            alias: name.to_string(),
                        }
                    }
                    _ => SelectColumn::Name(name.to_string()),
                }
            })
            .collect()
    }

    /// WHERE conditions from the criteria: spatial filters, trusted
    /// passthrough, then registered extensions.
    fn build_conditions(
        &self,
        criteria: &SearchCriteria,
        info: Option<&GeometryInfo>,
    ) -> Result<Vec<Condition>> {
        let mut conditions = Vec::new();

        if let Some(intersect) = &criteria.intersect {
            let spatial = self.driver.spatial().ok_or(StoreError::NotImplemented(
                "spatial intersect filter requires a geometry-capable driver",
            ))?;
            let info = info.ok_or_else(|| {
                StoreError::Config(format!(
                    "intersect filter on repository for '{}' which has no geometry column",
                    self.config.table
                ))
            })?;
            let wkt_srid = geometry::srid_of(intersect)
                .or(criteria.srid)
                .or(info.srid)
                .ok_or_else(|| {
                    StoreError::Config("no SRID resolvable for intersect filter".into())
                })?;
            let column_srid = info.srid.unwrap_or(wkt_srid);
            conditions.push(spatial.intersect_condition(
                &info.column,
                geometry::strip_srid(intersect),
                wkt_srid,
                column_srid,
            ));
        }

        if let (Some(source), Some(distance)) = (&criteria.source, criteria.distance) {
            let spatial = self.driver.spatial().ok_or(StoreError::NotImplemented(
                "spatial distance filter requires a geometry-capable driver",
            ))?;
            let info = info.ok_or_else(|| {
                StoreError::Config(format!(
                    "distance filter on repository for '{}' which has no geometry column",
                    self.config.table
                ))
            })?;
            let column_srid = info
                .srid
                .or_else(|| geometry::srid_of(source))
                .ok_or_else(|| {
                    StoreError::Config("no SRID resolvable for distance filter".into())
                })?;
            conditions.push(spatial.distance_condition(
                &info.column,
                source,
                distance,
                column_srid,
            ));
        }

        if let Some(where_clause) = &criteria.where_clause {
            if !where_clause.is_empty() {
                conditions.push(Condition::raw(where_clause.clone()));
            }
        }

        for filter in &self.filters {
            conditions.extend(filter(criteria));
        }

        Ok(conditions)
    }
}

fn values_to_json(values: &BTreeMap<String, SqlValue>) -> JsonValue {
    let mut map = JsonMap::new();
    for (name, value) in values {
        map.insert(name.clone(), value.to_json());
    }
    JsonValue::Object(map)
}

fn json_to_values(object: &JsonMap<String, JsonValue>) -> BTreeMap<String, SqlValue> {
    object
        .iter()
        .map(|(name, value)| (name.clone(), SqlValue::from_json(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::config::GeometrySpec;
    use crate::core::schema::Column;
    use crate::core::traits::SpatialDriver;
    use crate::core::value::Row;
    use crate::events::HookEvent;

    /// In-memory driver that interprets the generic statement shapes, with a
    /// toy spatial capability: bounding-box intersection, Euclidean distance,
    /// textual MULTI promotion, SRID rewrites without reprojection.
    struct MemoryDriver {
        rows: Mutex<BTreeMap<i64, BTreeMap<String, SqlValue>>>,
        next_id: AtomicI64,
        srid: Option<i32>,
        geometry_type: Option<String>,
        spatial: bool,
        last_geometry_sql: Mutex<Option<String>>,
    }

    impl MemoryDriver {
        fn new(spatial: bool, srid: Option<i32>, geometry_type: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(BTreeMap::new()),
                next_id: AtomicI64::new(1),
                srid,
                geometry_type: geometry_type.map(str::to_string),
                spatial,
                last_geometry_sql: Mutex::new(None),
            })
        }

        fn row(&self, id: i64) -> Option<BTreeMap<String, SqlValue>> {
            self.rows.lock().unwrap().get(&id).cloned()
        }

        fn apply_expr(&self, expr: &SqlExpr) -> SqlValue {
            match expr {
                SqlExpr::Bound(value) => value.clone(),
                SqlExpr::Raw { sql, params } => {
                    *self.last_geometry_sql.lock().unwrap() = Some(sql.clone());
                    let ewkt = params
                        .first()
                        .and_then(SqlValue::as_str)
                        .unwrap_or_default();
                    let mut bare = geometry::strip_srid(ewkt).to_string();
                    if sql.contains("MULTI(") {
                        bare = promote_text(&bare);
                    }
                    let srid = parse_tf_srid(sql)
                        .or(self.srid)
                        .or_else(|| geometry::srid_of(ewkt));
                    match srid {
                        Some(srid) => SqlValue::Text(geometry::with_srid(&bare, srid)),
                        None => SqlValue::Text(bare),
                    }
                }
            }
        }

        fn matches(&self, id: i64, attrs: &BTreeMap<String, SqlValue>, cond: &Condition) -> bool {
            if cond.sql.contains("\"id\" = ") {
                return cond.params.first().and_then(SqlValue::as_i64) == Some(id);
            }
            if cond.sql.starts_with("BBOX(") {
                let filter = cond
                    .params
                    .first()
                    .and_then(SqlValue::as_str)
                    .unwrap_or_default();
                let bbox = coords(filter);
                let point = stored_point(attrs);
                let (Some(point), false) = (point, bbox.is_empty()) else {
                    return false;
                };
                let min_x = bbox.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
                let max_x = bbox.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
                let min_y = bbox.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
                let max_y = bbox.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
                return point.0 >= min_x && point.0 <= max_x && point.1 >= min_y && point.1 <= max_y;
            }
            if cond.sql.starts_with("DIST(") {
                let source = cond
                    .params
                    .first()
                    .and_then(SqlValue::as_str)
                    .unwrap_or_default();
                let radius = match cond.params.get(1) {
                    Some(SqlValue::Double(d)) => *d,
                    _ => return false,
                };
                let (Some(anchor), Some(point)) =
                    (coords(source).into_iter().next(), stored_point(attrs))
                else {
                    return false;
                };
                let dx = anchor.0 - point.0;
                let dy = anchor.1 - point.1;
                return (dx * dx + dy * dy).sqrt() <= radius;
            }
            true
        }
    }

    fn stored_point(attrs: &BTreeMap<String, SqlValue>) -> Option<(f64, f64)> {
        let text = attrs.get("geom").and_then(SqlValue::as_str)?;
        coords(geometry::strip_srid(text)).into_iter().next()
    }

    /// Coordinate pairs from a WKT body, ignoring type tokens and nesting.
    fn coords(wkt: &str) -> Vec<(f64, f64)> {
        let cleaned: String = wkt
            .chars()
            .map(|c| {
                if c == '(' || c == ')' || c.is_ascii_alphabetic() {
                    ' '
                } else {
                    c
                }
            })
            .collect();
        cleaned
            .split(',')
            .filter_map(|pair| {
                let mut parts = pair.split_whitespace();
                let x: f64 = parts.next()?.parse().ok()?;
                let y: f64 = parts.next()?.parse().ok()?;
                Some((x, y))
            })
            .collect()
    }

    fn promote_text(wkt: &str) -> String {
        match wkt.find('(') {
            Some(idx) => format!("MULTI{}({})", wkt[..idx].trim_end(), &wkt[idx..]),
            None => format!("MULTI{}", wkt),
        }
    }

    fn parse_tf_srid(sql: &str) -> Option<i32> {
        let start = sql.find("TF(")?;
        let rest = &sql[start..];
        let comma = rest.rfind(", ")?;
        let digits: String = rest[comma + 2..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    #[async_trait]
    impl Driver for MemoryDriver {
        fn dialect_name(&self) -> &str {
            "memory"
        }

        fn quote_ident(&self, name: &str) -> String {
            format!("\"{}\"", name)
        }

        async fn insert(&self, _table: &str, changes: &ChangeSet, _id_column: &str) -> Result<i64> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut row = BTreeMap::new();
            for (column, expr) in changes.entries() {
                row.insert(column.to_string(), self.apply_expr(expr));
            }
            self.rows.lock().unwrap().insert(id, row);
            Ok(id)
        }

        async fn update(&self, table: &str, changes: &ChangeSet, id: &IdPredicate) -> Result<u64> {
            let applied: Vec<_> = changes
                .entries()
                .iter()
                .filter(|(column, _)| !column.eq_ignore_ascii_case(&id.column))
                .collect();
            if applied.is_empty() {
                return Err(StoreError::NoChanges {
                    table: table.to_string(),
                });
            }
            let target = id.value.as_i64().unwrap_or(0);
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.get_mut(&target) else {
                return Ok(0);
            };
            for (column, expr) in applied {
                row.insert(column.to_string(), self.apply_expr(expr));
            }
            Ok(1)
        }

        async fn delete(&self, _table: &str, id: &IdPredicate) -> Result<u64> {
            let target = id.value.as_i64().unwrap_or(0);
            Ok(self.rows.lock().unwrap().remove(&target).map_or(0, |_| 1))
        }

        async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>> {
            let rows = self.rows.lock().unwrap();
            let matched: Vec<(i64, BTreeMap<String, SqlValue>)> = rows
                .iter()
                .filter(|(id, attrs)| {
                    query.conditions.iter().all(|c| self.matches(**id, attrs, c))
                })
                .map(|(id, attrs)| (*id, attrs.clone()))
                .collect();

            if query.count_only {
                let mut row = Row::new();
                row.insert("cnt", SqlValue::Int(matched.len() as i64));
                return Ok(vec![row]);
            }

            let limit = query.limit.unwrap_or(u64::MAX) as usize;
            let mut out = Vec::new();
            for (id, attrs) in matched.into_iter().take(limit) {
                let mut row = Row::new();
                for column in &query.columns {
                    match column {
                        SelectColumn::Name(name) if name == "id" => {
                            row.insert("id", SqlValue::Int(id));
                        }
                        SelectColumn::Name(name) => {
                            row.insert(
                                name.clone(),
                                attrs.get(name).cloned().unwrap_or(SqlValue::Null),
                            );
                        }
                        SelectColumn::Expr { sql, alias } => {
                            let value = match attrs.get(alias).and_then(SqlValue::as_str) {
                                Some(text) => {
                                    let text = match parse_tf_srid(sql) {
                                        Some(srid) => geometry::with_srid(
                                            geometry::strip_srid(text),
                                            srid,
                                        ),
                                        None => text.to_string(),
                                    };
                                    SqlValue::Text(text)
                                }
                                None => SqlValue::Null,
                            };
                            row.insert(alias.clone(), value);
                        }
                    }
                }
                out.push(row);
            }
            Ok(out)
        }

        fn spatial(&self) -> Option<&dyn SpatialDriver> {
            if self.spatial {
                Some(self)
            } else {
                None
            }
        }
    }

    #[async_trait]
    impl SpatialDriver for MemoryDriver {
        fn read_ewkt(&self, expr: &str) -> String {
            format!("GEO({})", expr)
        }

        fn dump_wkt(&self, expr: &str) -> String {
            format!("DUMP({})", expr)
        }

        fn transform_srid(&self, expr: &str, target_srid: i32) -> String {
            format!("TF({}, {})", expr, target_srid)
        }

        fn promote_to_collection(&self, expr: &str) -> String {
            format!("MULTI({})", expr)
        }

        fn intersect_condition(
            &self,
            column: &str,
            wkt: &str,
            _wkt_srid: i32,
            _column_srid: i32,
        ) -> Condition {
            Condition::new(
                format!("BBOX({})", self.quote_ident(column)),
                vec![SqlValue::Text(wkt.to_string())],
            )
        }

        fn distance_condition(
            &self,
            column: &str,
            source_ewkt: &str,
            distance: f64,
            _column_srid: i32,
        ) -> Condition {
            Condition::new(
                format!("DIST({})", self.quote_ident(column)),
                vec![
                    SqlValue::Text(source_ewkt.to_string()),
                    SqlValue::Double(distance),
                ],
            )
        }

        async fn add_geometry_column(
            &self,
            _table: &str,
            _geometry_type: &str,
            _srid: i32,
            _column: &str,
            _dims: i32,
        ) -> Result<()> {
            Ok(())
        }

        async fn column_srid(&self, _table: &str, _column: &str) -> Result<Option<i32>> {
            Ok(self.srid)
        }

        async fn column_geometry_type(
            &self,
            _table: &str,
            _column: &str,
        ) -> Result<Option<String>> {
            Ok(self.geometry_type.clone())
        }
    }

    #[async_trait]
    impl MetadataLoader for MemoryDriver {
        async fn load_table_meta(&self, table: &str) -> Result<TableMetadata> {
            let mut meta = TableMetadata::new(table);
            meta.add_column("id", Column::new(false, true, true));
            meta.add_column("name", Column::new(true, false, false));
            meta.add_column("geom", Column::new(true, false, false));
            Ok(meta)
        }
    }

    struct RecordingHooks {
        handled: Vec<HookEvent>,
        veto_on: Option<HookEvent>,
        rewrite_name: bool,
        seen: Mutex<Vec<HookEvent>>,
    }

    impl RecordingHooks {
        fn new(handled: Vec<HookEvent>) -> Arc<Self> {
            Arc::new(Self {
                handled,
                veto_on: None,
                rewrite_name: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn vetoing(handled: Vec<HookEvent>, veto_on: HookEvent) -> Arc<Self> {
            Arc::new(Self {
                handled,
                veto_on: Some(veto_on),
                rewrite_name: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<HookEvent> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HookRunner for RecordingHooks {
        fn handles(&self, event: HookEvent) -> bool {
            self.handled.contains(&event)
        }

        async fn run(&self, event: HookEvent, payload: &mut HookPayload) -> Result<()> {
            self.seen.lock().unwrap().push(event);
            if self.veto_on == Some(event) {
                payload.veto();
            }
            if self.rewrite_name && event == HookEvent::BeforeInsert {
                if let Some(JsonValue::Object(values)) = payload.fields.get_mut("values") {
                    values.insert("name".into(), JsonValue::String("hooked".into()));
                }
            }
            Ok(())
        }
    }

    fn plain_repo(driver: Arc<MemoryDriver>) -> Repository {
        Repository::new(driver.clone(), driver, RepositoryConfig::new("features")).unwrap()
    }

    fn geo_repo(driver: Arc<MemoryDriver>, spec: GeometrySpec) -> Repository {
        let config = RepositoryConfig::new("features").with_geometry(spec);
        Repository::new(driver.clone(), driver, config).unwrap()
    }

    #[test]
    fn test_empty_table_rejected() {
        let driver = MemoryDriver::new(false, None, None);
        let err =
            Repository::new(driver.clone(), driver, RepositoryConfig::new("")).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[tokio::test]
    async fn test_insert_binds_generated_id() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver.clone());

        let mut item = repo.new_item();
        item.set_attribute("name", "road");
        repo.insert(&mut item).await.unwrap();

        assert_eq!(item.id(), Some(&SqlValue::Int(1)));
        let row = driver.row(1).unwrap();
        assert_eq!(row.get("name"), Some(&SqlValue::Text("road".into())));
    }

    #[tokio::test]
    async fn test_unknown_attribute_dropped() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver.clone());

        let mut item = repo.new_item();
        item.set_attribute("name", "a");
        item.set_attribute("no_such_column", "b");
        repo.insert(&mut item).await.unwrap();

        let row = driver.row(1).unwrap();
        assert!(!row.contains_key("no_such_column"));
    }

    #[tokio::test]
    async fn test_update_without_id_fails() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver);
        let mut item = repo.new_item();
        let err = repo.update(&mut item).await.unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[tokio::test]
    async fn test_update_empty_changes_fails() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver);

        let mut item = repo.new_item();
        item.set_attribute("name", "a");
        repo.insert(&mut item).await.unwrap();

        let mut empty = repo.new_item();
        empty.set_id(1i64);
        let err = repo.update(&mut empty).await.unwrap_err();
        assert!(matches!(err, StoreError::NoChanges { .. }));
    }

    #[tokio::test]
    async fn test_save_routes_on_identifier() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver.clone());

        let mut item = repo.new_item();
        item.set_attribute("name", "first");
        repo.save(&mut item).await.unwrap();
        assert_eq!(item.id(), Some(&SqlValue::Int(1)));

        item.set_attribute("name", "second");
        repo.save(&mut item).await.unwrap();

        let row = driver.row(1).unwrap();
        assert_eq!(row.get("name"), Some(&SqlValue::Text("second".into())));
        assert_eq!(driver.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver.clone());

        let mut item = repo.new_item();
        item.set_attribute("name", "x");
        repo.insert(&mut item).await.unwrap();

        assert_eq!(repo.remove(1i64).await.unwrap(), 1);
        assert_eq!(repo.remove(1i64).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_by_id_miss() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver);
        assert!(repo.get_by_id(99i64, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_feature_round_trip() {
        let driver = MemoryDriver::new(true, Some(4326), Some("POINT"));
        let repo = geo_repo(driver.clone(), GeometrySpec::new("geom"));

        let mut feature = repo.new_feature().unwrap();
        feature.item_mut().set_attribute("name", "well");
        feature.set_geom("POINT(5 5)", None);
        repo.save_feature(&mut feature).await.unwrap();
        assert_eq!(feature.id(), Some(&SqlValue::Int(1)));

        let loaded = repo.get_feature_by_id(1i64, None).await.unwrap().unwrap();
        assert_eq!(loaded.geom(), Some("POINT(5 5)"));
        assert_eq!(loaded.srid(), Some(4326));
        assert_eq!(
            loaded.item().attribute("name"),
            Some(&SqlValue::Text("well".into()))
        );
    }

    #[tokio::test]
    async fn test_geometry_round_trip_all_type_tokens() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        // GEOMETRY catch-all column, so no token is promoted on the way in
        let driver = MemoryDriver::new(true, Some(4326), Some("GEOMETRY"));
        let repo = geo_repo(driver, GeometrySpec::new("geom"));

        let wkts = [
            "POINT(1 2)",
            "LINESTRING(0 0,1 1,2 0)",
            "POLYGON((0 0,4 0,4 4,0 4,0 0))",
            "MULTIPOINT((1 1),(2 2))",
            "MULTILINESTRING((0 0,1 1),(2 2,3 3))",
            "MULTIPOLYGON(((0 0,1 0,1 1,0 0)))",
            "GEOMETRYCOLLECTION(POINT(1 1),LINESTRING(0 0,1 1))",
        ];

        for wkt in wkts {
            let mut feature = repo.new_feature().unwrap();
            feature.set_geom(wkt, None);
            repo.save_feature(&mut feature).await.unwrap();

            let id = feature.id().cloned().unwrap();
            let loaded = repo.get_feature_by_id(id, None).await.unwrap().unwrap();
            assert_eq!(loaded.geom(), Some(wkt));
            assert_eq!(loaded.srid(), Some(4326));
        }
    }

    #[tokio::test]
    async fn test_get_by_id_reprojects_on_request() {
        let driver = MemoryDriver::new(true, Some(4326), Some("POINT"));
        let repo = geo_repo(driver.clone(), GeometrySpec::new("geom"));

        let mut feature = repo.new_feature().unwrap();
        feature.set_geom("POINT(5 5)", None);
        repo.save_feature(&mut feature).await.unwrap();

        let loaded = repo
            .get_feature_by_id(1i64, Some(31467))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.srid(), Some(31467));
    }

    #[tokio::test]
    async fn test_polygon_promoted_to_multi() {
        let driver = MemoryDriver::new(true, Some(4326), Some("MULTIPOLYGON"));
        let repo = geo_repo(driver.clone(), GeometrySpec::new("geom"));

        let mut feature = repo.new_feature().unwrap();
        feature.set_geom("POLYGON((0 0,1 0,1 1,0 0))", None);
        repo.save_feature(&mut feature).await.unwrap();

        let sql = driver.last_geometry_sql.lock().unwrap().clone().unwrap();
        assert!(sql.contains("MULTI("));
        let row = driver.row(1).unwrap();
        let stored = row.get("geom").and_then(SqlValue::as_str).unwrap();
        assert_eq!(stored, "SRID=4326;MULTIPOLYGON(((0 0,1 0,1 1,0 0)))");
    }

    #[tokio::test]
    async fn test_multi_input_not_promoted() {
        let driver = MemoryDriver::new(true, Some(4326), Some("MULTIPOLYGON"));
        let repo = geo_repo(driver.clone(), GeometrySpec::new("geom"));

        let mut feature = repo.new_feature().unwrap();
        feature.set_geom("MULTIPOLYGON(((0 0,1 0,1 1,0 0)))", None);
        repo.save_feature(&mut feature).await.unwrap();

        let sql = driver.last_geometry_sql.lock().unwrap().clone().unwrap();
        assert!(!sql.contains("MULTI("));
    }

    #[tokio::test]
    async fn test_degenerate_geometry_becomes_empty_point() {
        let driver = MemoryDriver::new(true, Some(4326), Some("POINT"));
        let repo = geo_repo(driver.clone(), GeometrySpec::new("geom"));

        let mut feature = repo.new_feature().unwrap();
        feature.set_geom("POINT(NaN NaN)", None);
        repo.save_feature(&mut feature).await.unwrap();

        let row = driver.row(1).unwrap();
        let stored = row.get("geom").and_then(SqlValue::as_str).unwrap();
        assert_eq!(stored, "SRID=4326;POINT EMPTY");
    }

    #[tokio::test]
    async fn test_geometry_stored_as_text_without_spatial_capability() {
        let driver = MemoryDriver::new(false, None, None);
        let config = RepositoryConfig::new("features")
            .with_geometry(GeometrySpec::new("geom").with_srid(4326));
        let repo = Repository::new(driver.clone(), driver.clone(), config).unwrap();

        let mut feature = repo.new_feature().unwrap();
        feature.set_geom("POINT(1 2)", None);
        repo.save_feature(&mut feature).await.unwrap();

        let row = driver.row(1).unwrap();
        assert_eq!(
            row.get("geom"),
            Some(&SqlValue::Text("SRID=4326;POINT(1 2)".into()))
        );
    }

    #[tokio::test]
    async fn test_intersect_search() {
        let driver = MemoryDriver::new(true, Some(4326), Some("POINT"));
        let repo = geo_repo(driver.clone(), GeometrySpec::new("geom"));

        for wkt in ["POINT(5 5)", "POINT(50 50)"] {
            let mut feature = repo.new_feature().unwrap();
            feature.set_geom(wkt, None);
            repo.save_feature(&mut feature).await.unwrap();
        }

        let criteria =
            SearchCriteria::new().with_intersect("POLYGON((0 0,10 0,10 10,0 10,0 0))");
        let found = repo.search_features(criteria).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].geom(), Some("POINT(5 5)"));
    }

    #[tokio::test]
    async fn test_distance_search() {
        let driver = MemoryDriver::new(true, Some(4326), Some("POINT"));
        let repo = geo_repo(driver.clone(), GeometrySpec::new("geom"));

        for wkt in ["POINT(1 1)", "POINT(30 30)"] {
            let mut feature = repo.new_feature().unwrap();
            feature.set_geom(wkt, None);
            repo.save_feature(&mut feature).await.unwrap();
        }

        let criteria = SearchCriteria::new().with_distance("POINT(0 0)", 5.0);
        let found = repo.search_features(criteria).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].geom(), Some("POINT(1 1)"));
    }

    #[tokio::test]
    async fn test_search_max_results() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver);

        for i in 0..5 {
            let mut item = repo.new_item();
            item.set_attribute("name", format!("n{}", i));
            repo.insert(&mut item).await.unwrap();
        }

        let found = repo
            .search(SearchCriteria::new().with_max_results(2))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_count() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver);

        for _ in 0..3 {
            let mut item = repo.new_item();
            item.set_attribute("name", "x");
            repo.insert(&mut item).await.unwrap();
        }

        assert_eq!(repo.count(&SearchCriteria::new()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_intersect_requires_spatial_capability() {
        let driver = MemoryDriver::new(false, None, None);
        let config = RepositoryConfig::new("features")
            .with_geometry(GeometrySpec::new("geom").with_srid(4326));
        let repo = Repository::new(driver.clone(), driver, config).unwrap();

        let err = repo
            .search(SearchCriteria::new().with_intersect("POLYGON((0 0,1 0,1 1,0 0))"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotImplemented(_)));
    }

    #[tokio::test]
    async fn test_criteria_filter_extension() {
        let driver = MemoryDriver::new(false, None, None);
        let mut repo = plain_repo(driver);
        repo.add_filter(|criteria| {
            criteria
                .extra
                .get("onlyId")
                .and_then(JsonValue::as_i64)
                .map(|id| {
                    vec![Condition::new("\"id\" = ?", vec![SqlValue::Int(id)])]
                })
                .unwrap_or_default()
        });

        for _ in 0..3 {
            let mut item = repo.new_item();
            item.set_attribute("name", "x");
            repo.insert(&mut item).await.unwrap();
        }

        let criteria =
            SearchCriteria::from_json(&serde_json::json!({ "onlyId": 2 })).unwrap();
        let found = repo.search(criteria).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), Some(&SqlValue::Int(2)));
    }

    #[tokio::test]
    async fn test_insert_veto_skips_write_but_fires_post_hook() {
        let driver = MemoryDriver::new(false, None, None);
        let hooks = RecordingHooks::vetoing(
            vec![HookEvent::BeforeInsert, HookEvent::AfterInsert],
            HookEvent::BeforeInsert,
        );
        let repo = plain_repo(driver.clone()).with_hooks(hooks.clone());

        let mut item = repo.new_item();
        item.set_attribute("name", "blocked");
        repo.insert(&mut item).await.unwrap();

        assert!(item.id().is_none());
        assert!(driver.rows.lock().unwrap().is_empty());
        assert_eq!(
            hooks.seen(),
            vec![HookEvent::BeforeInsert, HookEvent::AfterInsert]
        );
    }

    #[tokio::test]
    async fn test_hook_rewrites_values_before_insert() {
        let driver = MemoryDriver::new(false, None, None);
        let hooks = Arc::new(RecordingHooks {
            handled: vec![HookEvent::BeforeInsert],
            veto_on: None,
            rewrite_name: true,
            seen: Mutex::new(Vec::new()),
        });
        let repo = plain_repo(driver.clone()).with_hooks(hooks);

        let mut item = repo.new_item();
        item.set_attribute("name", "original");
        repo.insert(&mut item).await.unwrap();

        let row = driver.row(1).unwrap();
        assert_eq!(row.get("name"), Some(&SqlValue::Text("hooked".into())));
    }

    #[tokio::test]
    async fn test_hook_item_mutation_applied_to_entity() {
        let driver = MemoryDriver::new(false, None, None);

        struct Stamping;

        #[async_trait]
        impl HookRunner for Stamping {
            fn handles(&self, event: HookEvent) -> bool {
                event == HookEvent::AfterInsert
            }

            async fn run(&self, _event: HookEvent, payload: &mut HookPayload) -> Result<()> {
                if let Some(JsonValue::Object(item)) = payload.fields.get_mut("item") {
                    item.insert("name".into(), JsonValue::String("stamped".into()));
                    // identifier keys in the payload are never applied back
                    item.insert("id".into(), JsonValue::from(999));
                }
                Ok(())
            }
        }

        let repo = plain_repo(driver).with_hooks(Arc::new(Stamping));
        let mut item = repo.new_item();
        item.set_attribute("name", "original");
        repo.insert(&mut item).await.unwrap();

        assert_eq!(
            item.attribute("name"),
            Some(&SqlValue::Text("stamped".into()))
        );
        assert_eq!(item.id(), Some(&SqlValue::Int(1)));
    }

    #[tokio::test]
    async fn test_search_veto_returns_empty() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver.clone());
        let mut item = repo.new_item();
        item.set_attribute("name", "x");
        repo.insert(&mut item).await.unwrap();

        let hooks = RecordingHooks::vetoing(
            vec![HookEvent::BeforeSearch],
            HookEvent::BeforeSearch,
        );
        let repo = plain_repo(driver).with_hooks(hooks);
        let found = repo.search(SearchCriteria::new()).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_update_hooks_see_previous_snapshot() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver.clone());
        let mut item = repo.new_item();
        item.set_attribute("name", "before");
        repo.insert(&mut item).await.unwrap();

        struct SnapshotCheck(Mutex<Option<String>>);

        #[async_trait]
        impl HookRunner for SnapshotCheck {
            fn handles(&self, event: HookEvent) -> bool {
                event == HookEvent::BeforeUpdate
            }

            async fn run(&self, _event: HookEvent, payload: &mut HookPayload) -> Result<()> {
                let previous = payload
                    .get("previous")
                    .and_then(|p| p.get("name"))
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
                *self.0.lock().unwrap() = previous;
                Ok(())
            }
        }

        let check = Arc::new(SnapshotCheck(Mutex::new(None)));
        let repo = plain_repo(driver).with_hooks(check.clone());

        let mut updated = repo.new_item();
        updated.set_id(1i64);
        updated.set_attribute("name", "after");
        repo.update(&mut updated).await.unwrap();

        assert_eq!(check.0.lock().unwrap().clone(), Some("before".into()));
    }

    #[tokio::test]
    async fn test_new_feature_requires_geometry_config() {
        let driver = MemoryDriver::new(false, None, None);
        let repo = plain_repo(driver);
        assert!(matches!(
            repo.new_feature().unwrap_err(),
            StoreError::Config(_)
        ));
    }
}
