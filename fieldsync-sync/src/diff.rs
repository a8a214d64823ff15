//! Comparison snapshots used to suppress redundant Store writes.
//!
//! Each entity has an explicit comparison shape. Equality is structural over
//! that shape only, so key order in the Store body and unrelated keys never
//! trigger a write. Boundaries are compared in canonical closed-ring GeoJSON.

use serde::Serialize;
use serde_json::{json, Value};
use similar::TextDiff;

use fieldsync_core::StoreResource;

use crate::geometry::Geometry;

/// `{name, _id}` for a farm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FarmSnapshot {
    pub name: Option<String>,
    #[serde(rename = "_id")]
    pub id: Option<String>,
}

impl FarmSnapshot {
    pub fn new(name: &str, id: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            id: Some(id.to_string()),
        }
    }

    pub fn of_resource(resource: &StoreResource) -> Self {
        Self {
            name: resource.name().map(str::to_string),
            id: resource.id().map(str::to_string),
        }
    }

    /// The Store write body for this snapshot.
    pub fn to_data(&self) -> Value {
        json!({ "name": self.name, "_id": self.id })
    }
}

/// `{name, boundary: {geojson}, _id, _context: {farm}}` for a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSnapshot {
    pub name: Option<String>,
    /// Canonical GeoJSON; `None` when no usable boundary exists.
    pub boundary: Option<Value>,
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub context_farm: Option<String>,
}

impl FieldSnapshot {
    pub fn new(name: &str, boundary: Option<&Geometry>, id: &str, farm_id: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            boundary: boundary.map(Geometry::to_geojson),
            id: Some(id.to_string()),
            context_farm: Some(farm_id.to_string()),
        }
    }

    /// Snapshot of the current Store body. An unparsable stored boundary
    /// reads as absent, so any incoming boundary replaces it.
    pub fn of_resource(resource: &StoreResource) -> Self {
        Self {
            name: resource.name().map(str::to_string),
            boundary: resource
                .boundary_geojson()
                .and_then(|geojson| Geometry::from_geojson(geojson).ok())
                .map(|geometry| geometry.to_geojson()),
            id: resource.id().map(str::to_string),
            context_farm: resource
                .get("_context")
                .and_then(|context| context.get("farm"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// The Store write body. `boundary` is left out when there is none so a
    /// merge keeps whatever the Store already holds.
    pub fn to_data(&self) -> Value {
        let mut data = json!({
            "name": self.name,
            "_id": self.id,
            "_context": { "farm": self.context_farm },
        });
        if let Some(geojson) = &self.boundary {
            data["boundary"] = json!({ "geojson": geojson });
        }
        data
    }
}

/// True when `incoming` differs from `current` and a write is due.
pub fn needs_write<T: PartialEq>(current: &T, incoming: &T) -> bool {
    current != incoming
}

/// Unified text diff of two snapshots, for debug logging.
pub fn describe_mismatch<T: Serialize>(label: &str, current: &T, incoming: &T) -> String {
    let current = pretty(current);
    let incoming = pretty(incoming);
    let old_header = format!("store/{label}");
    let new_header = format!("provider/{label}");
    TextDiff::from_lines(&current, &incoming)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

fn pretty<T: Serialize>(value: &T) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_default();
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_field(geojson: Value) -> StoreResource {
        StoreResource(json!({
            "_id": "resources/J",
            "_rev": 4,
            "name": "Back 80",
            "boundary": { "geojson": geojson },
            "_context": { "farm": "resources/K" },
            "_meta": { "datasilo": { "field_id": "resources/J" } }
        }))
    }

    #[test]
    fn farm_snapshot_ignores_unrelated_keys() {
        let resource = StoreResource(json!({
            "_rev": 9,
            "_id": "resources/K",
            "name": "North 40",
            "tags": ["x"]
        }));
        let current = FarmSnapshot::of_resource(&resource);
        assert!(!needs_write(&current, &FarmSnapshot::new("North 40", "resources/K")));
        assert!(needs_write(&current, &FarmSnapshot::new("North 41", "resources/K")));
    }

    #[test]
    fn open_and_closed_stored_rings_compare_equal() {
        let wkt = Geometry::from_wkt("POLYGON((0 0,10 0,10 10,0 10))").unwrap();
        let incoming = FieldSnapshot::new("Back 80", Some(&wkt), "resources/J", "resources/K");

        let open = stored_field(json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [10, 0], [10, 10], [0, 10]]]
        }));
        assert!(!needs_write(&FieldSnapshot::of_resource(&open), &incoming));
    }

    #[test]
    fn moved_vertex_is_a_mismatch() {
        let wkt = Geometry::from_wkt("POLYGON((0 0,10 0,10 12,0 10))").unwrap();
        let incoming = FieldSnapshot::new("Back 80", Some(&wkt), "resources/J", "resources/K");
        let current = FieldSnapshot::of_resource(&stored_field(json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]]]
        })));
        assert!(needs_write(&current, &incoming));

        let rendered = describe_mismatch("field/J", &current, &incoming);
        assert!(rendered.contains("--- store/field/J"));
        assert!(rendered.contains("+++ provider/field/J"));
    }

    #[test]
    fn field_data_omits_missing_boundary() {
        let snapshot = FieldSnapshot::new("Back 80", None, "resources/J", "resources/K");
        let data = snapshot.to_data();
        assert!(data.get("boundary").is_none());
        assert_eq!(data["_context"]["farm"], "resources/K");
    }
}
