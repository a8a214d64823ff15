//! In-memory Provider and Store.
//!
//! Both record every call so reconcilers can be exercised end to end and
//! their effects asserted without a network.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use fieldsync_core::tree::segments;
use fieldsync_core::{GrowerRecord, TreeTemplate};

use crate::error::{SyncError, SyncResult};
use crate::provider::{Entity, Fetched, Provider, WriteMode};
use crate::store::{split_meta_path, PathLookup, Store};

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// A scripted answer to one `fetch_growers` call.
#[derive(Debug, Clone)]
pub enum ScriptedFetch {
    Growers(Vec<GrowerRecord>),
    NotModified,
    Fail { status: u16, message: String },
}

/// One recorded Provider write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderCall {
    pub entity: Entity,
    pub mode: WriteMode,
    pub payload: Value,
}

#[derive(Debug, Default)]
struct ProviderState {
    script: VecDeque<ScriptedFetch>,
    fetches: Vec<String>,
    writes: Vec<ProviderCall>,
    aliases: BTreeMap<String, String>,
}

/// Provider whose fetches follow a script. An exhausted script answers
/// `NotModified`.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Mutex<ProviderState>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_fetch(&self, fetch: ScriptedFetch) {
        self.state.lock().await.script.push_back(fetch);
    }

    pub async fn push_growers(&self, growers: Vec<GrowerRecord>) {
        self.push_fetch(ScriptedFetch::Growers(growers)).await;
    }

    pub async fn seed_alias(&self, external_id: &str, identifier: &str) {
        self.state
            .lock()
            .await
            .aliases
            .insert(external_id.to_string(), identifier.to_string());
    }

    /// `since` values of every fetch, in call order.
    pub async fn fetches(&self) -> Vec<String> {
        self.state.lock().await.fetches.clone()
    }

    pub async fn writes(&self) -> Vec<ProviderCall> {
        self.state.lock().await.writes.clone()
    }

    pub async fn aliases(&self) -> BTreeMap<String, String> {
        self.state.lock().await.aliases.clone()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn fetch_growers(&self, since: &str) -> SyncResult<Fetched> {
        let mut state = self.state.lock().await;
        state.fetches.push(since.to_string());
        match state.script.pop_front() {
            Some(ScriptedFetch::Growers(growers)) => Ok(Fetched::Growers(growers)),
            Some(ScriptedFetch::NotModified) | None => Ok(Fetched::NotModified),
            Some(ScriptedFetch::Fail { status, message }) => {
                Err(SyncError::Provider { status, message })
            }
        }
    }

    async fn write(&self, entity: Entity, mode: WriteMode, payload: &Value) -> SyncResult<()> {
        self.state.lock().await.writes.push(ProviderCall {
            entity,
            mode,
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn get_alias(&self, external_id: &str) -> SyncResult<Option<String>> {
        Ok(self.state.lock().await.aliases.get(external_id).cloned())
    }

    async fn put_alias(&self, external_id: &str, identifier: &str) -> SyncResult<()> {
        self.state
            .lock()
            .await
            .aliases
            .insert(external_id.to_string(), identifier.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOp {
    Put,
    Delete,
}

/// One recorded Store mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreCall {
    pub op: StoreOp,
    pub path: String,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Resource bodies keyed by the tree path they are linked at.
    nodes: BTreeMap<String, Value>,
    changes: BTreeMap<(String, u64), Value>,
    writes: Vec<StoreCall>,
    next_id: u64,
}

impl StoreState {
    fn mint_id(&mut self) -> String {
        self.next_id += 1;
        format!("resources/mem-{}", self.next_id)
    }

    fn create_node(&mut self, path: &str, content_type: &str, id: Option<String>) {
        let id = id.unwrap_or_else(|| self.mint_id());
        self.nodes.insert(
            path.to_string(),
            json!({ "_id": id, "_rev": 0, "_type": content_type, "_meta": {} }),
        );
    }
}

/// Tree-addressed Store held in a map of path → resource body.
///
/// Resolution picks the longest existing path prefix. Deleting a path
/// removes every resource linked beneath it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a resource body at `path` without recording a write.
    pub async fn insert(&self, path: &str, body: Value) {
        self.state.lock().await.nodes.insert(path.to_string(), body);
    }

    /// Register the diff body served for `(resource_id, rev)`.
    pub async fn record_change(&self, resource_id: &str, rev: u64, body: Value) {
        self.state
            .lock()
            .await
            .changes
            .insert((resource_id.to_string(), rev), body);
    }

    pub async fn resource_at(&self, path: &str) -> Option<Value> {
        self.state.lock().await.nodes.get(path).cloned()
    }

    pub async fn writes(&self) -> Vec<StoreCall> {
        self.state.lock().await.writes.clone()
    }

    pub async fn clear_writes(&self) {
        self.state.lock().await.writes.clear();
    }
}

/// Recursive JSON merge: objects merge key by key, anything else replaces.
pub fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

fn bump_rev(node: &mut Value) {
    let rev = node.get("_rev").and_then(Value::as_u64).unwrap_or(0);
    node["_rev"] = json!(rev + 1);
}

#[async_trait]
impl Store for MemoryStore {
    async fn lookup(&self, path: &str, _user_id: &str) -> SyncResult<Option<PathLookup>> {
        let state = self.state.lock().await;
        let parts: Vec<&str> = segments(path).collect();
        for depth in (1..=parts.len()).rev() {
            let prefix = format!("/{}", parts[..depth].join("/"));
            if let Some(node) = state.nodes.get(&prefix) {
                let resource_id = node
                    .get("_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let leftover: String = parts[depth..].iter().map(|s| format!("/{s}")).collect();
                return Ok(Some(PathLookup {
                    resource_id,
                    path_leftover: leftover,
                }));
            }
        }
        Ok(None)
    }

    async fn get_resource(&self, resource_id: &str) -> SyncResult<Value> {
        let state = self.state.lock().await;
        state
            .nodes
            .values()
            .find(|node| node.get("_id").and_then(Value::as_str) == Some(resource_id))
            .cloned()
            .ok_or_else(|| SyncError::Store(format!("resource {resource_id} not found")))
    }

    async fn put(&self, tree: &TreeTemplate, path: &str, mut data: Value) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        let (resource_path, meta_only) = split_meta_path(path);
        let own_id = data.get("_id").and_then(Value::as_str).map(str::to_string);

        for prefix in tree.resource_prefixes(resource_path) {
            if state.nodes.contains_key(&prefix) {
                continue;
            }
            let content_type = tree.content_type_at(&prefix).unwrap_or("application/json");
            let id = if prefix == resource_path {
                own_id.clone()
            } else {
                None
            };
            state.create_node(&prefix, content_type, id);
        }
        if !state.nodes.contains_key(resource_path) {
            state.create_node(resource_path, "application/json", own_id);
        }

        let Some(node) = state.nodes.get_mut(resource_path) else {
            return Err(SyncError::Store(format!("no resource at {resource_path}")));
        };
        if meta_only {
            merge(&mut node["_meta"], data);
        } else {
            let meta = data.as_object_mut().and_then(|map| map.remove("_meta"));
            merge(node, data);
            if let Some(meta) = meta {
                merge(&mut node["_meta"], meta);
            }
        }
        bump_rev(node);

        state.writes.push(StoreCall {
            op: StoreOp::Put,
            path: path.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, path: &str) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        let nested = format!("{path}/");
        state
            .nodes
            .retain(|key, _| key != path && !key.starts_with(&nested));
        state.writes.push(StoreCall {
            op: StoreOp::Delete,
            path: path.to_string(),
        });
        Ok(())
    }

    async fn get_change(&self, resource_id: &str, rev: u64) -> SyncResult<Value> {
        self.state
            .lock()
            .await
            .changes
            .get(&(resource_id.to_string(), rev))
            .cloned()
            .ok_or_else(|| {
                SyncError::Store(format!("no change recorded for {resource_id} at rev {rev}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::paths;

    #[tokio::test]
    async fn put_creates_template_prefixes_and_uses_own_id() {
        let store = MemoryStore::new();
        let path = paths::farm_path("K");
        store
            .put(
                &TreeTemplate::fields(),
                &path,
                json!({ "name": "North 40", "_id": "resources/K", "_meta": { "datasilo": { "farm_id": "resources/K" } } }),
            )
            .await
            .unwrap();

        let lookup = store.lookup(&path, "u").await.unwrap().unwrap();
        assert!(lookup.is_exact());
        assert_eq!(lookup.resource_id, "resources/K");

        let body = store.get_resource("resources/K").await.unwrap();
        assert_eq!(body["_meta"]["datasilo"]["farm_id"], "resources/K");
        assert_eq!(body["_type"], fieldsync_core::tree::FIELD_TYPE);
        assert!(store.resource_at("/bookmarks/fields").await.is_some());
        assert_eq!(store.writes().await.len(), 1);
    }

    #[tokio::test]
    async fn lookup_reports_leftover_below_deepest_resource() {
        let store = MemoryStore::new();
        store
            .put(&TreeTemplate::fields(), &paths::farm_path("K"), json!({ "_id": "resources/K" }))
            .await
            .unwrap();
        let lookup = store
            .lookup(&paths::field_path("K", "J"), "u")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lookup.resource_id, "resources/K");
        assert_eq!(lookup.path_leftover, "/fields-index/J");
    }

    #[tokio::test]
    async fn delete_removes_subtree() {
        let store = MemoryStore::new();
        let tree = TreeTemplate::fields();
        store
            .put(&tree, &paths::field_path("K", "J"), json!({ "_id": "resources/J" }))
            .await
            .unwrap();
        store.delete(&paths::farm_path("K")).await.unwrap();
        assert!(store.resource_at(&paths::field_path("K", "J")).await.is_none());
        assert!(store.get_resource("resources/J").await.is_err());
    }

    #[test]
    fn merge_is_recursive() {
        let mut target = json!({ "a": { "b": 1, "c": 2 }, "d": 3 });
        merge(&mut target, json!({ "a": { "b": 9 }, "e": 4 }));
        assert_eq!(target, json!({ "a": { "b": 9, "c": 2 }, "d": 3, "e": 4 }));
    }
}
