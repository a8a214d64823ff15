//! The Provider collaborator: the external REST service that owns grower,
//! farm, field and boundary records.

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use fieldsync_core::{GrowerRecord, ProviderConfig};

use crate::error::{SyncError, SyncResult};

/// Provider entities that accept writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Farm,
    Field,
    Boundary,
}

impl Entity {
    pub fn as_str(self) -> &'static str {
        match self {
            Entity::Farm => "farm",
            Entity::Field => "field",
            Entity::Boundary => "boundary",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Create` is a POST, `Update` a PUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Create,
    Update,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Create => f.write_str("create"),
            WriteMode::Update => f.write_str("update"),
        }
    }
}

/// Result of a conditional grower fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Growers(Vec<GrowerRecord>),
    NotModified,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Expanded grower listing changed since `since` (conditional header value).
    async fn fetch_growers(&self, since: &str) -> SyncResult<Fetched>;

    async fn write(&self, entity: Entity, mode: WriteMode, payload: &Value) -> SyncResult<()>;

    /// The Store identifier registered for `external_id`, if any.
    async fn get_alias(&self, external_id: &str) -> SyncResult<Option<String>>;

    async fn put_alias(&self, external_id: &str, identifier: &str) -> SyncResult<()>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct AliasBody {
    identifier: String,
}

/// Provider client over its REST API.
pub struct HttpProvider {
    client: Client,
    base_url: Url,
    token: String,
    expand: String,
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> SyncResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| SyncError::InvalidUrl {
            url: config.base_url.clone(),
            message: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl {
                url: config.base_url.clone(),
                message: "not a base URL".to_string(),
            });
        }
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
            expand: config.expand.clone(),
        })
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }
}

/// Turn a non-success response into [`SyncError::Provider`].
async fn check(response: reqwest::Response) -> SyncResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SyncError::Provider {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl Provider for HttpProvider {
    async fn fetch_growers(&self, since: &str) -> SyncResult<Fetched> {
        let request = self
            .client
            .get(self.url(&["grower"]))
            .query(&[("expand", self.expand.as_str())])
            .header(reqwest::header::IF_MODIFIED_SINCE, since);
        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            tracing::debug!("grower listing not modified since {}", since);
            return Ok(Fetched::NotModified);
        }
        let growers = check(response).await?.json::<Vec<GrowerRecord>>().await?;
        Ok(Fetched::Growers(growers))
    }

    async fn write(&self, entity: Entity, mode: WriteMode, payload: &Value) -> SyncResult<()> {
        let url = self.url(&[entity.as_str()]);
        let request = match mode {
            WriteMode::Create => self.client.post(url),
            WriteMode::Update => self.client.put(url),
        };
        check(self.authorize(request.json(payload)).send().await?).await?;
        Ok(())
    }

    async fn get_alias(&self, external_id: &str) -> SyncResult<Option<String>> {
        let request = self.client.get(self.url(&["alias", external_id]));
        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = check(response).await?.json::<AliasBody>().await?;
        Ok(Some(body.identifier).filter(|id| !id.is_empty()))
    }

    async fn put_alias(&self, external_id: &str, identifier: &str) -> SyncResult<()> {
        let body = AliasBody {
            identifier: identifier.to_string(),
        };
        let request = self
            .client
            .put(self.url(&["alias", external_id]))
            .json(&body);
        check(self.authorize(request).send().await?).await?;
        Ok(())
    }
}
