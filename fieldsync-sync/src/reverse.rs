//! Store → Provider reconciliation for one change event.
//!
//! The change body is keyed `fields-index → farm key → fields-index → field
//! key`. Farms and fields are visited one at a time. A Store resource whose
//! `_meta.datasilo` already records the Provider ID is updated (PUT);
//! otherwise it is created (POST).

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

use fieldsync_core::{index_entries, paths, ChangeEvent, StoreResource, WriteNotification};

use crate::error::{SyncError, SyncResult};
use crate::forward::ForwardReconciler;
use crate::geometry::Geometry;
use crate::provider::{Entity, Fetched, WriteMode};
use crate::state::Session;

/// Optional Store field keys copied onto a boundary payload.
const BOUNDARY_EXTRAS: [&str; 5] = ["season", "acres", "sum_acres", "failure_acres", "imported_acres"];

/// One Provider write issued for an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderWrite {
    pub entity: Entity,
    pub mode: WriteMode,
    /// Store resource the write was derived from.
    pub store_id: String,
}

/// Summary of one change event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventReport {
    pub resource_id: String,
    pub rev: u64,
    pub writes: Vec<ProviderWrite>,
    /// Keys in the change body that did not resolve to a Store resource, or
    /// whose record failed locally.
    pub skipped: Vec<String>,
}

pub struct ReverseReconciler {
    session: Session,
}

impl ReverseReconciler {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Reconcile one accepted notification.
    ///
    /// When the grower mapping is missing the services record is rebuilt
    /// from the Provider and the original error is still returned; the
    /// event is dropped for this cycle.
    pub async fn handle(&self, note: &WriteNotification) -> SyncResult<EventReport> {
        match self.process(note).await {
            Err(err @ SyncError::MissingGrowerAlias { .. }) => {
                tracing::warn!("{}; bootstrapping grower mapping", err);
                if let Err(bootstrap_err) = self.bootstrap_grower().await {
                    tracing::error!("grower bootstrap failed: {}", bootstrap_err);
                }
                Err(err)
            }
            other => other,
        }
    }

    async fn process(&self, note: &WriteNotification) -> SyncResult<EventReport> {
        let user_id = if note.user_id.is_empty() {
            self.session.user_id.as_str()
        } else {
            note.user_id.as_str()
        };
        let event = ChangeEvent {
            body: self
                .session
                .store
                .get_change(&note.resource_id, note.rev)
                .await?,
            resource_id: note.resource_id.clone(),
            rev: note.rev,
        };
        let grower_id = self.grower_id(user_id).await?;

        let mut report = EventReport {
            resource_id: event.resource_id.clone(),
            rev: event.rev,
            ..EventReport::default()
        };

        for (farm_key, farm_change) in event.farms() {
            let farm_path = paths::farm_path(farm_key);
            let Some(farm) = self.resource_at(&farm_path, user_id).await? else {
                tracing::debug!("farm {} not in store; skipped", farm_key);
                report.skipped.push(farm_path);
                continue;
            };
            let farm_id = match required_id(&farm, &farm_path) {
                Ok(id) => id,
                Err(err) if err.is_record_local() => {
                    tracing::warn!("{}", err);
                    report.skipped.push(farm_path);
                    continue;
                }
                Err(err) => return Err(err),
            };

            if farm_change.get("name").is_some() || farm_change.get("_id").is_some() {
                let payload = farm_payload(farm_change, &farm, &grower_id, &farm_id);
                let mode = write_mode(farm.datasilo_meta().and_then(|m| m.farm_id).is_some());
                self.session
                    .provider
                    .write(Entity::Farm, mode, &payload)
                    .await?;
                tracing::info!("{} farm {} on provider", mode, farm_id);
                report.writes.push(ProviderWrite {
                    entity: Entity::Farm,
                    mode,
                    store_id: farm_id.clone(),
                });
            }

            for (field_key, field_change) in index_entries(farm_change) {
                let field_path = paths::field_path(farm_key, field_key);
                match self
                    .push_field(&field_path, field_change, &grower_id, &farm_id, user_id, &mut report)
                    .await
                {
                    Ok(()) => {}
                    Err(err) if err.is_record_local() => {
                        tracing::warn!("field {} skipped: {}", field_path, err);
                        report.skipped.push(field_path);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(report)
    }

    async fn push_field(
        &self,
        field_path: &str,
        field_change: &Value,
        grower_id: &Value,
        farm_id: &str,
        user_id: &str,
        report: &mut EventReport,
    ) -> SyncResult<()> {
        let Some(field) = self.resource_at(field_path, user_id).await? else {
            tracing::debug!("field {} not in store; skipped", field_path);
            report.skipped.push(field_path.to_string());
            return Ok(());
        };
        let field_id = required_id(&field, field_path)?;
        let mode = write_mode(field.datasilo_meta().and_then(|m| m.field_id).is_some());

        // Build everything before writing so a bad boundary sends nothing.
        let payload = field_payload(field_change, &field, grower_id, farm_id, &field_id);
        let boundary = if field_change.get("boundary").is_some() {
            let boundary_id = paths::boundary_id(&field_id);
            boundary_payload(&field, grower_id, farm_id, &field_id, &boundary_id)?
        } else {
            None
        };

        let provider = &self.session.provider;
        provider.write(Entity::Field, mode, &payload).await?;
        tracing::info!("{} field {} on provider", mode, field_id);
        report.writes.push(ProviderWrite {
            entity: Entity::Field,
            mode,
            store_id: field_id.clone(),
        });

        if let Some(boundary) = boundary {
            provider.write(Entity::Boundary, mode, &boundary).await?;
            tracing::info!("{} boundary of {} on provider", mode, field_id);
            report.writes.push(ProviderWrite {
                entity: Entity::Boundary,
                mode,
                store_id: paths::boundary_id(&field_id),
            });
        }
        Ok(())
    }

    /// Provider grower ID recorded under the services path.
    async fn grower_id(&self, user_id: &str) -> SyncResult<Value> {
        let missing = || SyncError::MissingGrowerAlias {
            path: paths::SERVICES_PATH.to_string(),
        };
        let services = self
            .resource_at(paths::SERVICES_PATH, user_id)
            .await?
            .ok_or_else(missing)?;
        services.get("grower_id").cloned().ok_or_else(missing)
    }

    /// The resource at `path` when the path resolves exactly.
    async fn resource_at(&self, path: &str, user_id: &str) -> SyncResult<Option<StoreResource>> {
        let store = &self.session.store;
        match store.lookup(path, user_id).await? {
            Some(lookup) if lookup.is_exact() => {
                Ok(Some(StoreResource(store.get_resource(&lookup.resource_id).await?)))
            }
            _ => Ok(None),
        }
    }

    /// Re-fetch the grower listing from the bootstrap cursor and register
    /// the first grower.
    pub async fn bootstrap_grower(&self) -> SyncResult<()> {
        let since = self.session.bootstrap_cursor(Utc::now()).header_value();
        let growers = match self.session.provider.fetch_growers(&since).await? {
            Fetched::Growers(growers) => growers,
            Fetched::NotModified => return Ok(()),
        };
        if let Some(grower) = growers.first() {
            let report = ForwardReconciler::new(&self.session)
                .check_grower(grower)
                .await?;
            tracing::info!("grower bootstrap: {:?}", report.outcome);
        }
        Ok(())
    }
}

fn write_mode(known_on_provider: bool) -> WriteMode {
    if known_on_provider {
        WriteMode::Update
    } else {
        WriteMode::Create
    }
}

fn required_id(resource: &StoreResource, path: &str) -> SyncResult<String> {
    resource
        .id()
        .map(str::to_string)
        .ok_or_else(|| SyncError::MalformedRecord(format!("resource at {path} has no _id")))
}

/// `(key, body)` pairs under a change body's `fields-index`.
fn present<'v>(value: Option<&'v Value>) -> Option<&'v Value> {
    value.filter(|v| !v.is_null())
}

/// `{grower_id, farm_id, name, tags?}`; the change wins over the Store body.
pub fn farm_payload(change: &Value, farm: &StoreResource, grower_id: &Value, farm_id: &str) -> Value {
    let name = present(change.get("name"))
        .cloned()
        .or_else(|| farm.get("name").cloned())
        .unwrap_or(Value::Null);
    let mut payload = json!({
        "grower_id": grower_id,
        "farm_id": farm_id,
        "name": name,
    });
    if let Some(tags) = present(change.get("tags")).or_else(|| farm.get("tags")) {
        payload["tags"] = tags.clone();
    }
    payload
}

/// `{grower_id, farm_id, field_id, name, tags?}`; the name always comes from
/// the Store field, tags prefer the change.
pub fn field_payload(
    change: &Value,
    field: &StoreResource,
    grower_id: &Value,
    farm_id: &str,
    field_id: &str,
) -> Value {
    let mut payload = json!({
        "grower_id": grower_id,
        "farm_id": farm_id,
        "field_id": field_id,
        "name": field.get("name").cloned().unwrap_or(Value::Null),
    });
    if let Some(tags) = present(change.get("tags")).or_else(|| field.get("tags")) {
        payload["tags"] = tags.clone();
    }
    payload
}

/// Boundary payload with the Store's GeoJSON converted to closed-ring WKT.
/// `None` when the Store field carries no geometry.
pub fn boundary_payload(
    field: &StoreResource,
    grower_id: &Value,
    farm_id: &str,
    field_id: &str,
    boundary_id: &str,
) -> SyncResult<Option<Value>> {
    let Some(geojson) = field.boundary_geojson() else {
        return Ok(None);
    };
    let wkt = Geometry::from_geojson(geojson)?.to_wkt();
    let name = format!("{}_boundary", field.name().unwrap_or_default());

    let mut payload = Map::new();
    payload.insert("grower_id".into(), grower_id.clone());
    payload.insert("farm_id".into(), json!(farm_id));
    payload.insert("parent_id".into(), json!(field_id));
    payload.insert("boundary_id".into(), json!(boundary_id));
    payload.insert("field_id".into(), json!(field_id));
    payload.insert("name".into(), json!(name));
    payload.insert("boundary".into(), json!(wkt));
    for key in BOUNDARY_EXTRAS {
        if let Some(value) = field.get(key) {
            payload.insert(key.into(), value.clone());
        }
    }
    Ok(Some(Value::Object(payload)))
}
