//! Provider → Store reconciliation for one grower hierarchy.
//!
//! Each level resolves the record's Store key, decides create, update or
//! delete, and writes only when the comparison snapshot differs. A deleted
//! record's identifier is retired so no later tick writes to its path again.

use serde::Serialize;
use serde_json::json;

use fieldsync_core::tree::{FARM_ID_TAG, FIELD_ID_TAG};
use fieldsync_core::{
    paths, FarmRecord, FieldRecord, GrowerRecord, RecordStatus, StoreResource, TreeTemplate,
};

use crate::alias::Resolved;
use crate::diff::{describe_mismatch, needs_write, FarmSnapshot, FieldSnapshot};
use crate::error::{SyncError, SyncResult};
use crate::geometry::Geometry;
use crate::state::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Grower,
    Farm,
    Field,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
    /// Only the `_meta.datasilo` block was written.
    MetaBackfilled,
    Deleted,
    /// Nothing to do for this status (e.g. deletion of a record never mirrored).
    Skipped,
    /// A record-local error; siblings were still processed.
    Failed,
}

impl ReconcileOutcome {
    /// True when the Store was written.
    pub fn wrote(self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Created
                | ReconcileOutcome::Updated
                | ReconcileOutcome::MetaBackfilled
                | ReconcileOutcome::Deleted
        )
    }
}

/// What happened to one Provider record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordReport {
    pub kind: EntityKind,
    pub provider_id: String,
    pub store_id: Option<String>,
    pub outcome: ReconcileOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RecordReport {
    fn new(kind: EntityKind, provider_id: impl ToString, outcome: ReconcileOutcome) -> Self {
        Self {
            kind,
            provider_id: provider_id.to_string(),
            store_id: None,
            outcome,
            detail: None,
        }
    }

    fn store_id(mut self, id: impl Into<String>) -> Self {
        self.store_id = Some(id.into());
        self
    }

    fn failed(kind: EntityKind, provider_id: impl ToString, err: &SyncError) -> Self {
        Self {
            detail: Some(err.to_string()),
            ..Self::new(kind, provider_id, ReconcileOutcome::Failed)
        }
    }
}

/// Outcome of `check_farm`; `farm_id` is set when child fields should be
/// processed under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmResolution {
    pub report: RecordReport,
    pub farm_id: Option<String>,
}

pub struct ForwardReconciler<'a> {
    session: &'a Session,
    fields: TreeTemplate,
    services: TreeTemplate,
}

impl<'a> ForwardReconciler<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            fields: TreeTemplate::fields(),
            services: TreeTemplate::services(),
        }
    }

    /// Reconcile a grower and everything under it, one record at a time.
    ///
    /// Record-local failures are reported as [`ReconcileOutcome::Failed`] and
    /// processing moves on. Any other failure stops the walk and is returned;
    /// `reports` keeps what was done before it.
    pub async fn reconcile_grower(
        &self,
        grower: &GrowerRecord,
        reports: &mut Vec<RecordReport>,
    ) -> SyncResult<()> {
        reports.push(self.check_grower(grower).await?);

        for farm in &grower.farm {
            let resolution = match self.check_farm(farm).await {
                Ok(resolution) => resolution,
                Err(err) if err.is_record_local() => {
                    tracing::warn!("farm {} skipped: {}", farm.id, err);
                    reports.push(RecordReport::failed(EntityKind::Farm, &farm.id, &err));
                    continue;
                }
                Err(err) => return Err(err),
            };
            reports.push(resolution.report);

            let Some(farm_id) = resolution.farm_id else {
                continue;
            };
            for field in &farm.field {
                match self.check_field(field, &farm_id).await {
                    Ok(report) => reports.push(report),
                    Err(err) if err.is_record_local() => {
                        tracing::warn!("field {} skipped: {}", field.id, err);
                        reports.push(RecordReport::failed(EntityKind::Field, &field.id, &err));
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Ensure the services record reflects the grower.
    pub async fn check_grower(&self, grower: &GrowerRecord) -> SyncResult<RecordReport> {
        let Some(grower_id) = &grower.id else {
            tracing::debug!("grower without id skipped");
            return Ok(RecordReport::new(EntityKind::Grower, "", ReconcileOutcome::Skipped));
        };
        let store = &self.session.store;

        let mut known = false;
        if let Some(lookup) = store
            .lookup(paths::SERVICES_PATH, &self.session.user_id)
            .await?
        {
            if lookup.is_exact() {
                let services = StoreResource(store.get_resource(&lookup.resource_id).await?);
                known = services.get("grower_id").is_some();
            }
        }

        let outcome = match (known, grower.status) {
            (true, RecordStatus::Deleted) => {
                store.delete(paths::SERVICES_PATH).await?;
                tracing::info!("grower {} deleted; removed services record", grower_id);
                ReconcileOutcome::Deleted
            }
            (true, _) => ReconcileOutcome::Unchanged,
            (false, status) if status.is_live() => {
                store
                    .put(
                        &self.services,
                        paths::SERVICES_PATH,
                        json!({ "grower_id": grower_id }),
                    )
                    .await?;
                tracing::info!("registered grower {} under services", grower_id);
                ReconcileOutcome::Created
            }
            (false, _) => ReconcileOutcome::Skipped,
        };
        Ok(RecordReport::new(EntityKind::Grower, grower_id, outcome))
    }

    /// Resolve a farm's Store identifier, mirroring it when live.
    pub async fn check_farm(&self, farm: &FarmRecord) -> SyncResult<FarmResolution> {
        let Some(resolved) = self
            .resolve(farm.id.as_str(), farm.identifier(FARM_ID_TAG), farm.status)
            .await?
        else {
            return Ok(FarmResolution {
                report: RecordReport::new(EntityKind::Farm, &farm.id, ReconcileOutcome::Skipped),
                farm_id: None,
            });
        };
        let store = &self.session.store;
        let path = paths::farm_path(&resolved.key);
        let farm_id = resolved.id.clone();
        let existing = store.lookup(&path, &self.session.user_id).await?;

        let outcome = match existing.filter(|lookup| lookup.is_exact()) {
            Some(lookup) if farm.status.is_live() => {
                let current = StoreResource(store.get_resource(&lookup.resource_id).await?);
                let incoming = FarmSnapshot::new(&farm.name, &farm_id);
                let before = FarmSnapshot::of_resource(&current);

                let mut outcome = ReconcileOutcome::Unchanged;
                if needs_write(&before, &incoming) {
                    tracing::debug!(
                        "farm {} differs:\n{}",
                        resolved.key,
                        describe_mismatch(&format!("farm/{}", resolved.key), &before, &incoming)
                    );
                    store.put(&self.fields, &path, incoming.to_data()).await?;
                    outcome = ReconcileOutcome::Updated;
                }
                if !current.has_datasilo_meta() {
                    store
                        .put(
                            &self.fields,
                            &paths::meta_path(&path),
                            json!({ "datasilo": { "farm_id": farm_id } }),
                        )
                        .await?;
                    if outcome == ReconcileOutcome::Unchanged {
                        outcome = ReconcileOutcome::MetaBackfilled;
                    }
                }
                outcome
            }
            Some(_) if farm.status.is_deleted() => {
                store.delete(&path).await?;
                tracing::info!("farm {} deleted at {}", farm.id, path);
                ReconcileOutcome::Deleted
            }
            Some(_) => ReconcileOutcome::Skipped,
            None if farm.status.is_live() => {
                let data = json!({
                    "name": farm.name,
                    "_id": farm_id,
                    "_meta": { "datasilo": { "farm_id": farm_id } },
                });
                store.put(&self.fields, &path, data).await?;
                tracing::info!("created farm {} at {}", farm.id, path);
                ReconcileOutcome::Created
            }
            None => ReconcileOutcome::Skipped,
        };

        if farm.status.is_deleted() {
            self.session.aliases.retire(&farm_id).await?;
            // The Store delete took the farm's fields with it.
            for field in &farm.field {
                if let Some(child) = self
                    .resolve(field.id.as_str(), field.identifier(FIELD_ID_TAG), RecordStatus::Deleted)
                    .await?
                {
                    self.retire_field(&child.id).await?;
                }
            }
        }

        let report = RecordReport::new(EntityKind::Farm, &farm.id, outcome).store_id(&farm_id);
        Ok(FarmResolution {
            report,
            farm_id: farm.status.is_live().then_some(farm_id),
        })
    }

    /// Mirror one field under the farm identified by `farm_id`.
    pub async fn check_field(&self, field: &FieldRecord, farm_id: &str) -> SyncResult<RecordReport> {
        // Parse before minting anything so a bad boundary leaves no trace.
        let geometry = if field.status.is_live() {
            field
                .active_boundary()
                .and_then(|boundary| boundary.boundary.as_deref())
                .map(Geometry::from_wkt)
                .transpose()?
        } else {
            None
        };

        let Some(resolved) = self
            .resolve(field.id.as_str(), field.identifier(FIELD_ID_TAG), field.status)
            .await?
        else {
            return Ok(RecordReport::new(EntityKind::Field, &field.id, ReconcileOutcome::Skipped));
        };
        let field_id = resolved.id.clone();
        let boundary_id = paths::boundary_id(&field_id);
        if field.status.is_live() {
            if let Some(boundary) = field.active_boundary() {
                self.session
                    .aliases
                    .register(boundary.id.as_str(), &boundary_id)
                    .await?;
            }
        }

        let store = &self.session.store;
        let farm_key = paths::key_from_id(farm_id);
        let path = paths::field_path(farm_key, &resolved.key);
        let existing = store.lookup(&path, &self.session.user_id).await?;

        let outcome = match existing.filter(|lookup| lookup.is_exact()) {
            Some(lookup) if field.status.is_live() => {
                let current = StoreResource(store.get_resource(&lookup.resource_id).await?);
                let before = FieldSnapshot::of_resource(&current);
                let mut incoming = FieldSnapshot::new(&field.name, geometry.as_ref(), &field_id, farm_id);
                if incoming.boundary.is_none() {
                    incoming.boundary = before.boundary.clone();
                }

                let mut outcome = ReconcileOutcome::Unchanged;
                if needs_write(&before, &incoming) {
                    tracing::debug!(
                        "field {} differs:\n{}",
                        resolved.key,
                        describe_mismatch(&format!("field/{}", resolved.key), &before, &incoming)
                    );
                    store.put(&self.fields, &path, incoming.to_data()).await?;
                    outcome = ReconcileOutcome::Updated;
                }
                if !current.has_datasilo_meta() {
                    store
                        .put(
                            &self.fields,
                            &paths::meta_path(&path),
                            json!({ "datasilo": { "field_id": field_id, "boundary_id": boundary_id } }),
                        )
                        .await?;
                    if outcome == ReconcileOutcome::Unchanged {
                        outcome = ReconcileOutcome::MetaBackfilled;
                    }
                }
                outcome
            }
            Some(_) if field.status.is_deleted() => {
                store.delete(&path).await?;
                tracing::info!("field {} deleted at {}", field.id, path);
                ReconcileOutcome::Deleted
            }
            Some(_) => ReconcileOutcome::Skipped,
            None if field.status.is_live() => {
                let mut data =
                    FieldSnapshot::new(&field.name, geometry.as_ref(), &field_id, farm_id).to_data();
                data["_meta"] = json!({
                    "datasilo": { "field_id": field_id, "boundary_id": boundary_id }
                });
                store.put(&self.fields, &path, data).await?;
                tracing::info!("created field {} at {}", field.id, path);
                ReconcileOutcome::Created
            }
            None => ReconcileOutcome::Skipped,
        };

        if field.status.is_deleted() {
            self.retire_field(&field_id).await?;
        }

        Ok(RecordReport::new(EntityKind::Field, &field.id, outcome).store_id(field_id))
    }

    async fn retire_field(&self, field_id: &str) -> SyncResult<()> {
        let aliases = &self.session.aliases;
        aliases.retire(field_id).await?;
        aliases.retire(&paths::boundary_id(field_id)).await
    }

    /// Store identifier for a record. Live records mint one when needed;
    /// other statuses only look up what already exists, preferring an
    /// identifier that is not retired.
    async fn resolve(
        &self,
        external_id: &str,
        tagged: Option<&str>,
        status: RecordStatus,
    ) -> SyncResult<Option<Resolved>> {
        let aliases = &self.session.aliases;
        if status.is_live() {
            return aliases.resolve_or_mint(external_id, tagged).await.map(Some);
        }
        if let Some(id) = tagged {
            if !aliases.is_retired(id).await {
                return Ok(Some(Resolved::existing(id)));
            }
        }
        Ok(aliases
            .lookup(external_id)
            .await?
            .or_else(|| tagged.map(str::to_string))
            .map(|id| Resolved::existing(&id)))
    }
}
