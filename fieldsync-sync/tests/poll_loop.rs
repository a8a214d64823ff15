mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use fieldsync_core::TreeTemplate;
use fieldsync_sync::cursor::format_since;
use fieldsync_sync::memory::ScriptedFetch;
use fieldsync_sync::{
    run_tick, AliasRegistry, FetchStatus, MemoryStore, PathLookup, Session, Store, SyncError,
    SyncResult, SyncState,
};

use common::{at, grower, harness};

fn listing() -> fieldsync_core::GrowerRecord {
    grower(json!({
        "id": 4411,
        "farm": [{ "id": "f1", "name": "North 40" }]
    }))
}

#[tokio::test]
async fn first_fetch_uses_bootstrap_cursor_then_advances() {
    let h = harness();
    let mut state = h.state();
    let bootstrap = state.cursor.header_value();

    h.provider.push_growers(vec![listing()]).await;
    let report = run_tick(&mut state, at(10)).await;

    assert_eq!(report.since, bootstrap);
    assert_eq!(report.fetch, FetchStatus::Fetched);
    assert_eq!(report.cursor, format_since(at(10)));

    run_tick(&mut state, at(20)).await;
    let fetches = h.provider.fetches().await;
    assert_eq!(fetches[0], bootstrap);
    assert_eq!(fetches[1], format_since(at(10)));
}

#[tokio::test]
async fn not_modified_is_retried_once_with_same_cursor() {
    let h = harness();
    let mut state = h.state();
    h.provider.push_fetch(ScriptedFetch::NotModified).await;
    h.provider.push_growers(vec![listing()]).await;

    let report = run_tick(&mut state, at(10)).await;

    let fetches = h.provider.fetches().await;
    assert_eq!(fetches.len(), 2);
    assert_eq!(fetches[0], fetches[1]);
    assert_eq!(report.fetch, FetchStatus::Fetched);
    assert_eq!(report.writes(), 2);
}

#[tokio::test]
async fn repeated_not_modified_abandons_tick_without_advancing() {
    let h = harness();
    let mut state = h.state();
    let before = state.cursor;
    h.provider.push_fetch(ScriptedFetch::NotModified).await;
    h.provider.push_fetch(ScriptedFetch::NotModified).await;
    h.provider.push_growers(vec![listing()]).await;

    let report = run_tick(&mut state, at(10)).await;

    assert_eq!(report.fetch, FetchStatus::NotModified);
    assert_eq!(state.cursor, before);
    assert!(report.records.is_empty());
    assert!(h.store.writes().await.is_empty());
    assert_eq!(h.provider.fetches().await.len(), 2, "no third attempt");
}

#[tokio::test]
async fn fetch_failure_keeps_cursor() {
    let h = harness();
    let mut state = h.state();
    let before = state.cursor;
    h.provider
        .push_fetch(ScriptedFetch::Fail {
            status: 502,
            message: "bad gateway".into(),
        })
        .await;

    let report = run_tick(&mut state, at(10)).await;

    assert!(matches!(report.fetch, FetchStatus::Failed(ref msg) if msg.contains("502")));
    assert_eq!(state.cursor, before);
    assert_eq!(h.provider.fetches().await.len(), 1, "errors are not retried");
}

#[tokio::test]
async fn only_first_grower_is_reconciled() {
    let h = harness();
    let mut state = h.state();
    h.provider
        .push_growers(vec![
            listing(),
            grower(json!({ "id": 9999, "farm": [{ "id": "other", "name": "Elsewhere" }] })),
        ])
        .await;

    let report = run_tick(&mut state, at(10)).await;

    assert_eq!(report.records.len(), 2);
    assert!(!h.provider.aliases().await.contains_key("other"));
}

/// Store whose writes always fail.
struct ReadOnlyStore(MemoryStore);

#[async_trait]
impl Store for ReadOnlyStore {
    async fn lookup(&self, path: &str, user_id: &str) -> SyncResult<Option<PathLookup>> {
        self.0.lookup(path, user_id).await
    }
    async fn get_resource(&self, resource_id: &str) -> SyncResult<Value> {
        self.0.get_resource(resource_id).await
    }
    async fn put(&self, _tree: &TreeTemplate, path: &str, _data: Value) -> SyncResult<()> {
        Err(SyncError::Store(format!("read-only: {path}")))
    }
    async fn delete(&self, path: &str) -> SyncResult<()> {
        Err(SyncError::Store(format!("read-only: {path}")))
    }
    async fn get_change(&self, resource_id: &str, rev: u64) -> SyncResult<Value> {
        self.0.get_change(resource_id, rev).await
    }
}

#[tokio::test]
async fn write_failure_aborts_tick_after_cursor_advance() {
    let h = harness();
    let session = Session {
        store: Arc::new(ReadOnlyStore(MemoryStore::new())),
        aliases: Arc::new(AliasRegistry::in_memory(h.provider.clone())),
        ..h.session.clone()
    };
    let mut state = SyncState::new(session, at(0));
    h.provider.push_growers(vec![listing()]).await;

    let report = run_tick(&mut state, at(10)).await;

    assert!(report.aborted.as_deref().is_some_and(|m| m.contains("read-only")));
    assert!(report.records.is_empty());
    assert_eq!(report.failed(), 1);
    assert_eq!(state.cursor.header_value(), format_since(at(10)));
}
