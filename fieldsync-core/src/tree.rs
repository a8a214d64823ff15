//! Store tree templates and the deterministic paths built on them.
//!
//! A template mirrors the Store tree: every node names its content type in
//! `_type` and starts at `_rev: 0`; `*` matches any single path segment.

use serde_json::{json, Value};

pub const BOOKMARKS_TYPE: &str = "application/vnd.oada.bookmarks.1+json";
pub const FIELDS_TYPE: &str = "application/vnd.oada.fields.1+json";
pub const FIELD_TYPE: &str = "application/vnd.oada.field.1+json";
pub const SERVICES_TYPE: &str = "application/vnd.oada.services.1+json";

/// Identifier tag carrying a farm's Store resource ID on the Provider side.
pub const FARM_ID_TAG: &str = "OADAPOC-farm-ID";
/// Identifier tag carrying a field's Store resource ID on the Provider side.
pub const FIELD_ID_TAG: &str = "OADAPOC-field-ID";

/// A schema describing content types for a Store subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeTemplate(Value);

impl TreeTemplate {
    /// `bookmarks/fields/fields-index/*/fields-index/*`
    pub fn fields() -> Self {
        Self(json!({
            "bookmarks": {
                "_type": BOOKMARKS_TYPE,
                "_rev": 0,
                "fields": {
                    "_type": FIELDS_TYPE,
                    "_rev": 0,
                    "fields-index": {
                        "*": {
                            "_type": FIELD_TYPE,
                            "_rev": 0,
                            "fields-index": {
                                "*": {
                                    "_type": FIELD_TYPE,
                                    "_rev": 0,
                                }
                            }
                        }
                    }
                }
            }
        }))
    }

    /// `bookmarks/services/datasilo`
    pub fn services() -> Self {
        Self(json!({
            "bookmarks": {
                "_type": BOOKMARKS_TYPE,
                "_rev": 0,
                "services": {
                    "_type": SERVICES_TYPE,
                    "_rev": 0,
                    "datasilo": {
                        "_type": SERVICES_TYPE,
                        "_rev": 0,
                    }
                }
            }
        }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// The template node addressed by `path`, following `*` wildcards.
    pub fn node_at(&self, path: &str) -> Option<&Value> {
        let mut node = &self.0;
        for segment in segments(path) {
            node = node.get(segment).or_else(|| node.get("*"))?;
        }
        Some(node)
    }

    /// Content type for the resource at `path`, if the template declares one.
    pub fn content_type_at(&self, path: &str) -> Option<&str> {
        self.node_at(path)?.get("_type")?.as_str()
    }

    /// Every prefix of `path` (shortest first) that the template declares as
    /// a resource. Used to create missing intermediate nodes before a write.
    pub fn resource_prefixes(&self, path: &str) -> Vec<String> {
        let mut prefixes = Vec::new();
        let mut current = String::new();
        for segment in segments(path) {
            current.push('/');
            current.push_str(segment);
            if self.content_type_at(&current).is_some() {
                prefixes.push(current.clone());
            }
        }
        prefixes
    }
}

/// Splits a Store path into its non-empty segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

pub mod paths {
    //! Deterministic Store paths for the grower → farm → field hierarchy.

    pub const FIELDS_INDEX_PATH: &str = "/bookmarks/fields/fields-index";
    pub const SERVICES_PATH: &str = "/bookmarks/services/datasilo";

    pub fn farm_path(farm_key: &str) -> String {
        format!("{FIELDS_INDEX_PATH}/{farm_key}")
    }

    pub fn field_path(farm_key: &str, field_key: &str) -> String {
        format!("{FIELDS_INDEX_PATH}/{farm_key}/fields-index/{field_key}")
    }

    pub fn meta_path(resource_path: &str) -> String {
        format!("{resource_path}/_meta")
    }

    /// `resources/K` → `K`; bare keys pass through.
    pub fn key_from_id(resource_id: &str) -> &str {
        resource_id
            .strip_prefix("resources/")
            .unwrap_or(resource_id)
    }

    /// `K` → `resources/K`.
    pub fn resource_id(key: &str) -> String {
        format!("resources/{key}")
    }

    /// The boundary ID paired with a field ID.
    pub fn boundary_id(field_id: &str) -> String {
        format!("{field_id}_boundary")
    }
}
