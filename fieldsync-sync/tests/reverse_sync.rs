mod common;

use serde_json::{json, Value};

use fieldsync_core::tree::FIELDS_TYPE;
use fieldsync_core::{paths, TreeTemplate, WriteNotification};
use fieldsync_sync::{Entity, ReverseReconciler, Store, SyncError, WriteMode};

use common::{grower, harness, Harness, USER};

const CHANGED: &str = "resources/fields";

fn note(rev: u64) -> WriteNotification {
    WriteNotification {
        msgtype: "write-response".into(),
        code: "success".into(),
        content_type: FIELDS_TYPE.into(),
        resource_id: CHANGED.into(),
        rev,
        user_id: USER.into(),
    }
}

fn square() -> Value {
    json!({ "type": "Polygon", "coordinates": [[[0, 0], [4, 0], [4, 4], [0, 4]]] })
}

async fn seed(h: &Harness, field_meta: Value) {
    let tree = TreeTemplate::fields();
    h.store
        .put(&TreeTemplate::services(), paths::SERVICES_PATH, json!({ "grower_id": 4411 }))
        .await
        .unwrap();
    h.store
        .put(
            &tree,
            &paths::farm_path("K"),
            json!({
                "_id": "resources/K",
                "name": "North 40",
                "_meta": { "datasilo": { "farm_id": "resources/K" } }
            }),
        )
        .await
        .unwrap();
    h.store
        .put(
            &tree,
            &paths::field_path("K", "J"),
            json!({
                "_id": "resources/J",
                "name": "Back 80",
                "acres": 80,
                "boundary": { "geojson": square() },
                "_meta": field_meta
            }),
        )
        .await
        .unwrap();
    h.store.clear_writes().await;
}

fn boundary_change() -> Value {
    json!({ "fields-index": { "K": { "fields-index": { "J": { "boundary": { "geojson": square() } } } } } })
}

#[tokio::test]
async fn field_without_provider_id_is_created_with_boundary() {
    let h = harness();
    seed(&h, json!({})).await;
    h.store.record_change(CHANGED, 7, boundary_change()).await;

    let report = ReverseReconciler::new(h.session.clone())
        .handle(&note(7))
        .await
        .expect("handled");

    let writes = h.provider.writes().await;
    assert_eq!(writes.len(), 2);
    assert_eq!((writes[0].entity, writes[0].mode), (Entity::Field, WriteMode::Create));
    assert_eq!((writes[1].entity, writes[1].mode), (Entity::Boundary, WriteMode::Create));
    assert_eq!(writes[0].payload["grower_id"], 4411);
    assert_eq!(writes[1].payload["boundary"], "POLYGON((0 0,4 0,4 4,0 4,0 0))");
    assert_eq!(writes[1].payload["boundary_id"], "resources/J_boundary");
    assert_eq!(writes[1].payload["acres"], 80);
    assert_eq!(report.writes.len(), 2);
    assert!(h.store.writes().await.is_empty(), "reverse sync never writes the store");
}

#[tokio::test]
async fn known_field_is_updated() {
    let h = harness();
    seed(&h, json!({ "datasilo": { "field_id": "resources/J" } })).await;
    h.store.record_change(CHANGED, 8, boundary_change()).await;

    ReverseReconciler::new(h.session.clone())
        .handle(&note(8))
        .await
        .expect("handled");

    let modes: Vec<_> = h.provider.writes().await.iter().map(|w| w.mode).collect();
    assert_eq!(modes, vec![WriteMode::Update, WriteMode::Update]);
}

#[tokio::test]
async fn farm_is_upserted_only_when_name_or_id_changed() {
    let h = harness();
    seed(&h, json!({})).await;
    h.store
        .record_change(CHANGED, 9, json!({ "fields-index": { "K": { "name": "North 41" } } }))
        .await;
    h.store
        .record_change(CHANGED, 10, json!({ "fields-index": { "K": { "tags": ["x"] } } }))
        .await;
    let reconciler = ReverseReconciler::new(h.session.clone());

    reconciler.handle(&note(9)).await.expect("rev 9");
    reconciler.handle(&note(10)).await.expect("rev 10");

    let writes = h.provider.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].entity, Entity::Farm);
    assert_eq!(writes[0].mode, WriteMode::Update);
    assert_eq!(writes[0].payload["name"], "North 41");
    assert_eq!(writes[0].payload["farm_id"], "resources/K");
}

#[tokio::test]
async fn unknown_keys_are_skipped() {
    let h = harness();
    seed(&h, json!({})).await;
    h.store
        .record_change(
            CHANGED,
            11,
            json!({ "fields-index": { "nope": { "name": "x" }, "K": { "fields-index": { "missing": { "name": "y" } } } } }),
        )
        .await;

    let report = ReverseReconciler::new(h.session.clone())
        .handle(&note(11))
        .await
        .expect("handled");

    assert!(h.provider.writes().await.is_empty());
    assert_eq!(report.skipped.len(), 2);
}

#[tokio::test]
async fn missing_grower_mapping_bootstraps_and_drops_event() {
    let h = harness();
    h.store.record_change(CHANGED, 12, boundary_change()).await;
    h.provider
        .push_growers(vec![grower(json!({ "id": 4411, "status": "active" }))])
        .await;

    let err = ReverseReconciler::new(h.session.clone())
        .handle(&note(12))
        .await
        .expect_err("event must be dropped");

    assert!(matches!(err, SyncError::MissingGrowerAlias { .. }));
    assert_eq!(h.provider.fetches().await.len(), 1);
    let services = h
        .store
        .resource_at(paths::SERVICES_PATH)
        .await
        .expect("services repaired");
    assert_eq!(services["grower_id"], "4411");
    assert!(h.provider.writes().await.is_empty());
}

#[tokio::test]
async fn bad_stored_geometry_skips_only_that_field() {
    let h = harness();
    seed(&h, json!({})).await;
    h.store
        .put(
            &TreeTemplate::fields(),
            &paths::field_path("K", "L"),
            json!({
                "_id": "resources/L",
                "name": "Sliver",
                "boundary": { "geojson": { "type": "Polygon", "coordinates": [[[0, 0], [1, 1]]] } }
            }),
        )
        .await
        .unwrap();
    h.store
        .record_change(
            CHANGED,
            13,
            json!({ "fields-index": { "K": { "fields-index": {
                "J": { "boundary": {} },
                "L": { "boundary": {} }
            } } } }),
        )
        .await;

    let report = ReverseReconciler::new(h.session.clone())
        .handle(&note(13))
        .await
        .expect("handled");

    assert_eq!(report.skipped, vec![paths::field_path("K", "L")]);
    let entities: Vec<_> = h.provider.writes().await.iter().map(|w| w.entity).collect();
    assert_eq!(entities, vec![Entity::Field, Entity::Boundary]);
}
