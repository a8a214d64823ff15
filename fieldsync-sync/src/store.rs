//! The Store collaborator: the internal tree-addressed document store.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use fieldsync_core::tree::segments;
use fieldsync_core::{StoreConfig, TreeTemplate};

use crate::error::{SyncError, SyncResult};

/// Outcome of resolving a tree path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathLookup {
    pub resource_id: String,
    /// The part of the path below `resource_id`; empty on an exact match.
    pub path_leftover: String,
}

impl PathLookup {
    pub fn exact(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            path_leftover: String::new(),
        }
    }

    pub fn is_exact(&self) -> bool {
        self.path_leftover.is_empty()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve `path` as seen by `user_id`. `None` when nothing on the path exists.
    async fn lookup(&self, path: &str, user_id: &str) -> SyncResult<Option<PathLookup>>;

    /// Resource body, `_meta` included.
    async fn get_resource(&self, resource_id: &str) -> SyncResult<Value>;

    /// Tree-templated merge at `path`. Missing intermediate resources are
    /// created with the template's content type. A `_meta` key in `data`, or
    /// a path ending in `/_meta`, writes the resource's meta block.
    async fn put(&self, tree: &TreeTemplate, path: &str, data: Value) -> SyncResult<()>;

    async fn delete(&self, path: &str) -> SyncResult<()>;

    /// Diff body recorded for `resource_id` at revision `rev`.
    async fn get_change(&self, resource_id: &str, rev: u64) -> SyncResult<Value>;
}

/// Split `/a/b/_meta` into (`/a/b`, true).
pub fn split_meta_path(path: &str) -> (&str, bool) {
    match path.strip_suffix("/_meta") {
        Some(resource_path) => (resource_path, true),
        None => (path, false),
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Store client over its HTTP interface.
pub struct HttpStore {
    client: Client,
    domain: String,
    token: String,
}

impl HttpStore {
    pub fn new(config: &StoreConfig) -> SyncResult<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            domain: config.domain.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let path = path.trim_start_matches('/');
        self.client
            .request(method, format!("{}/{}", self.domain, path))
            .bearer_auth(&self.token)
    }

    /// GET returning `None` on 404.
    async fn get_optional(&self, path: &str) -> SyncResult<Option<Value>> {
        let response = self.request(Method::GET, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response, path).await?;
        Ok(Some(response.json::<Value>().await?))
    }

    async fn put_json(&self, path: &str, content_type: &str, data: &Value) -> SyncResult<()> {
        let response = self
            .request(Method::PUT, path)
            .header(CONTENT_TYPE, content_type)
            .body(serde_json::to_vec(data)?)
            .send()
            .await?;
        check(response, path).await?;
        Ok(())
    }

    /// Create a bare resource and link it at `path`.
    async fn create_linked(
        &self,
        path: &str,
        content_type: &str,
        resource_id: Option<&str>,
    ) -> SyncResult<String> {
        let resource_id = match resource_id {
            Some(id) => {
                self.put_json(id, content_type, &json!({ "_type": content_type }))
                    .await?;
                id.to_string()
            }
            None => {
                let response = self
                    .request(Method::POST, "resources")
                    .header(CONTENT_TYPE, content_type)
                    .body(serde_json::to_vec(&json!({ "_type": content_type }))?)
                    .send()
                    .await?;
                let response = check(response, "resources").await?;
                response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .map(|location| location.trim_start_matches('/').to_string())
                    .ok_or_else(|| {
                        SyncError::Store("resource creation returned no Location".into())
                    })?
            }
        };

        let (parent, name) = match path.rsplit_once('/') {
            Some((parent, name)) if !name.is_empty() => (parent, name),
            _ => return Err(SyncError::Store(format!("cannot link resource at {path}"))),
        };
        let mut link = serde_json::Map::new();
        link.insert(name.to_string(), json!({ "_id": resource_id, "_rev": 0 }));
        self.put_json(parent, "application/json", &Value::Object(link))
            .await?;
        tracing::debug!("linked new resource {} at {}", resource_id, path);
        Ok(resource_id)
    }
}

async fn check(response: reqwest::Response, path: &str) -> SyncResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Store(format!("{status} at {path}: {body}")))
}

#[async_trait]
impl Store for HttpStore {
    async fn lookup(&self, path: &str, _user_id: &str) -> SyncResult<Option<PathLookup>> {
        let parts: Vec<&str> = segments(path).collect();
        // Walk up from the full path to the deepest node that is a resource.
        for depth in (1..=parts.len()).rev() {
            let prefix = format!("/{}", parts[..depth].join("/"));
            let Some(body) = self.get_optional(&prefix).await? else {
                if depth == parts.len() {
                    return Ok(None);
                }
                continue;
            };
            if let Some(id) = body.get("_id").and_then(Value::as_str) {
                let leftover: String = parts[depth..].iter().map(|s| format!("/{s}")).collect();
                return Ok(Some(PathLookup {
                    resource_id: id.to_string(),
                    path_leftover: leftover,
                }));
            }
        }
        Ok(None)
    }

    async fn get_resource(&self, resource_id: &str) -> SyncResult<Value> {
        let mut body = self
            .get_optional(resource_id)
            .await?
            .ok_or_else(|| SyncError::Store(format!("resource {resource_id} not found")))?;
        if let Some(meta) = self.get_optional(&format!("{resource_id}/_meta")).await? {
            if let Value::Object(map) = &mut body {
                map.insert("_meta".to_string(), meta);
            }
        }
        Ok(body)
    }

    async fn put(&self, tree: &TreeTemplate, path: &str, mut data: Value) -> SyncResult<()> {
        let (resource_path, meta_only) = split_meta_path(path);
        let own_id = data.get("_id").and_then(Value::as_str).map(str::to_string);

        for prefix in tree.resource_prefixes(resource_path) {
            if self.get_optional(&prefix).await?.is_some() {
                continue;
            }
            let content_type = tree.content_type_at(&prefix).unwrap_or("application/json");
            let id = (prefix == resource_path).then_some(own_id.as_deref()).flatten();
            self.create_linked(&prefix, content_type, id).await?;
        }

        let content_type = tree
            .content_type_at(resource_path)
            .unwrap_or("application/json");
        if meta_only {
            return self.put_json(path, content_type, &data).await;
        }

        let meta = data.as_object_mut().and_then(|map| map.remove("_meta"));
        self.put_json(resource_path, content_type, &data).await?;
        if let Some(meta) = meta {
            self.put_json(&format!("{resource_path}/_meta"), content_type, &meta)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> SyncResult<()> {
        let response = self.request(Method::DELETE, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response, path).await?;
        Ok(())
    }

    async fn get_change(&self, resource_id: &str, rev: u64) -> SyncResult<Value> {
        let path = format!("{resource_id}/_meta/_changes/{rev}");
        let change = self
            .get_optional(&path)
            .await?
            .ok_or_else(|| SyncError::Store(format!("no change recorded at {path}")))?;
        Ok(match change.get("body") {
            Some(body) => body.clone(),
            None => change,
        })
    }
}
