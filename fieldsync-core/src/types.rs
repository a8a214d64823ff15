//! Domain types shared by both sync directions.
//!
//! Provider records are deserialized straight from the Provider's expanded
//! `grower` listing. Store resources stay as loose JSON bodies and are read
//! through the [`StoreResource`] view.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A Provider-native object identifier.
///
/// The Provider emits numeric IDs for most objects and strings for a few;
/// both are normalised to their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ProviderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<u64> for ProviderId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => ProviderId(s),
            Raw::Number(n) => ProviderId(n.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status the Provider attaches to every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Added,
    #[default]
    Active,
    Deleted,
    /// Any status string this service does not act on.
    #[serde(other)]
    Unknown,
}

impl RecordStatus {
    /// `added` and `active` records are mirrored; everything else is not.
    pub fn is_live(self) -> bool {
        matches!(self, RecordStatus::Added | RecordStatus::Active)
    }

    pub fn is_deleted(self) -> bool {
        self == RecordStatus::Deleted
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Added => write!(f, "added"),
            RecordStatus::Active => write!(f, "active"),
            RecordStatus::Deleted => write!(f, "deleted"),
            RecordStatus::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider records
// ---------------------------------------------------------------------------

/// Identifier tags the Provider echoes back once an alias is registered.
pub type IdentifierMap = BTreeMap<String, Value>;

fn identifier_tag<'a>(map: &'a Option<IdentifierMap>, tag: &str) -> Option<&'a str> {
    map.as_ref()?
        .get(tag)?
        .as_str()
        .filter(|value| !value.is_empty())
}

/// A polygon boundary attached to a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRecord {
    pub id: ProviderId,
    /// Well-known-text polygon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<IdentifierMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub id: ProviderId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<IdentifierMap>,
    #[serde(default)]
    pub boundary: Vec<BoundaryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<Value>,
}

impl FieldRecord {
    pub fn identifier(&self, tag: &str) -> Option<&str> {
        identifier_tag(&self.identifier, tag)
    }

    /// The field's single active boundary, if the Provider sent one.
    pub fn active_boundary(&self) -> Option<&BoundaryRecord> {
        self.boundary.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmRecord {
    pub id: ProviderId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<IdentifierMap>,
    #[serde(default)]
    pub field: Vec<FieldRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
}

impl FarmRecord {
    pub fn identifier(&self, tag: &str) -> Option<&str> {
        identifier_tag(&self.identifier, tag)
    }
}

/// Root of the Provider's expanded hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowerRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ProviderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default)]
    pub farm: Vec<FarmRecord>,
}

// ---------------------------------------------------------------------------
// Store side
// ---------------------------------------------------------------------------

/// Reverse-direction identifiers kept under `_meta.datasilo`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatasiloMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary_id: Option<String>,
}

/// Read-only view over a Store resource body.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResource(pub Value);

impl StoreResource {
    pub fn id(&self) -> Option<&str> {
        self.0.get("_id").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    /// `boundary.geojson`, when the resource carries a geometry.
    pub fn boundary_geojson(&self) -> Option<&Value> {
        self.0
            .get("boundary")
            .and_then(|b| b.get("geojson"))
            .filter(|value| !value.is_null())
    }

    /// True when a `_meta.datasilo` block exists, whatever its contents.
    pub fn has_datasilo_meta(&self) -> bool {
        self.0
            .get("_meta")
            .and_then(|meta| meta.get("datasilo"))
            .map(|block| !block.is_null())
            .unwrap_or(false)
    }

    pub fn datasilo_meta(&self) -> Option<DatasiloMeta> {
        let block = self.0.get("_meta")?.get("datasilo")?;
        serde_json::from_value(block.clone()).ok()
    }
}

impl From<Value> for StoreResource {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Notifications and change records
// ---------------------------------------------------------------------------

/// A write-notification event from the messaging layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteNotification {
    pub msgtype: String,
    pub code: String,
    #[serde(rename = "contentType", default)]
    pub content_type: String,
    pub resource_id: String,
    #[serde(rename = "_rev")]
    pub rev: u64,
    #[serde(default)]
    pub user_id: String,
}

impl WriteNotification {
    /// Successful resource writes of the watched content type only.
    pub fn accepts(&self, watched_content_type: &str) -> bool {
        self.msgtype == "write-response"
            && self.code == "success"
            && self.content_type == watched_content_type
    }
}

/// The Store diff for one revision of a `fields-index` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub resource_id: String,
    pub rev: u64,
    pub body: Value,
}

impl ChangeEvent {
    /// `(farm key, farm change)` pairs from the top-level `fields-index`.
    pub fn farms(&self) -> Vec<(&str, &Value)> {
        index_entries(&self.body)
    }
}

/// Entries of a change body's `fields-index` map, in key order. Empty when
/// the body has no index.
pub fn index_entries(body: &Value) -> Vec<(&str, &Value)> {
    body.get("fields-index")
        .and_then(Value::as_object)
        .map(|index| index.iter().map(|(k, v)| (k.as_str(), v)).collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
