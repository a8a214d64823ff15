//! Boundary codec between the Provider's WKT and the Store's GeoJSON.
//!
//! Both directions close every ring: when the last position differs from the
//! first, the first is appended. A ring with fewer than three distinct
//! positions is rejected, so a successfully converted boundary always has
//! closed, non-degenerate rings.

use serde_json::{json, Value};
use thiserror::Error;

/// One `[x, y]` coordinate pair.
pub type Position = [f64; 2];
/// A linear ring; closed once it has passed through this module.
pub type Ring = Vec<Position>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("unparsable geometry: {0}")]
    Parse(String),

    #[error("unsupported geometry type '{0}'; expected Polygon or MultiPolygon")]
    UnsupportedType(String),

    #[error("ring {ring} has {distinct} distinct position(s); at least 3 required")]
    DegenerateRing { ring: usize, distinct: usize },

    #[error("coordinate is not a finite number")]
    NonFinite,
}

/// A boundary geometry with closed rings.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Geometry {
    /// Parse WKT (`POLYGON((…))` / `MULTIPOLYGON(((…)))`), closing rings.
    pub fn from_wkt(wkt: &str) -> Result<Self, GeometryError> {
        let mut parser = WktParser::new(wkt);
        let geometry = parser.geometry()?;
        parser.finish()?;
        geometry.closed()
    }

    /// Parse a GeoJSON geometry object, closing rings.
    pub fn from_geojson(value: &Value) -> Result<Self, GeometryError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GeometryError::Parse("GeoJSON object has no \"type\"".into()))?;
        let coordinates = value
            .get("coordinates")
            .ok_or_else(|| GeometryError::Parse("GeoJSON object has no \"coordinates\"".into()))?;

        let geometry = match kind {
            "Polygon" => Geometry::Polygon(json_polygon(coordinates)?),
            "MultiPolygon" => Geometry::MultiPolygon(
                json_array(coordinates)?
                    .iter()
                    .map(json_polygon)
                    .collect::<Result<_, _>>()?,
            ),
            other => return Err(GeometryError::UnsupportedType(other.to_string())),
        };
        geometry.closed()
    }

    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Polygon(rings) => format!("POLYGON({})", wkt_polygon(rings)),
            Geometry::MultiPolygon(polygons) => {
                let parts: Vec<String> = polygons.iter().map(|p| wkt_polygon(p)).collect();
                format!("MULTIPOLYGON({})", parts.join(","))
            }
        }
    }

    pub fn to_geojson(&self) -> Value {
        match self {
            Geometry::Polygon(rings) => json!({
                "type": "Polygon",
                "coordinates": rings,
            }),
            Geometry::MultiPolygon(polygons) => json!({
                "type": "MultiPolygon",
                "coordinates": polygons,
            }),
        }
    }

    pub fn rings(&self) -> Vec<&Ring> {
        match self {
            Geometry::Polygon(rings) => rings.iter().collect(),
            Geometry::MultiPolygon(polygons) => polygons.iter().flatten().collect(),
        }
    }

    fn closed(self) -> Result<Self, GeometryError> {
        let close_all = |rings: Vec<Ring>, offset: usize| -> Result<Vec<Ring>, GeometryError> {
            rings
                .into_iter()
                .enumerate()
                .map(|(i, ring)| close_ring(ring, offset + i))
                .collect()
        };
        match self {
            Geometry::Polygon(rings) => Ok(Geometry::Polygon(close_all(rings, 0)?)),
            Geometry::MultiPolygon(polygons) => {
                let mut offset = 0;
                let mut closed = Vec::with_capacity(polygons.len());
                for rings in polygons {
                    let count = rings.len();
                    closed.push(close_all(rings, offset)?);
                    offset += count;
                }
                Ok(Geometry::MultiPolygon(closed))
            }
        }
    }
}

/// WKT → Store boundary GeoJSON.
pub fn wkt_to_geojson(wkt: &str) -> Result<Value, GeometryError> {
    Ok(Geometry::from_wkt(wkt)?.to_geojson())
}

/// Store boundary GeoJSON → WKT.
pub fn geojson_to_wkt(geojson: &Value) -> Result<String, GeometryError> {
    Ok(Geometry::from_geojson(geojson)?.to_wkt())
}

/// Append the first position when the ring is open; reject degenerate rings.
pub fn close_ring(mut ring: Ring, index: usize) -> Result<Ring, GeometryError> {
    if ring.iter().flatten().any(|c| !c.is_finite()) {
        return Err(GeometryError::NonFinite);
    }
    let mut distinct: Vec<Position> = Vec::new();
    for position in &ring {
        if !distinct.contains(position) {
            distinct.push(*position);
        }
    }
    if distinct.len() < 3 {
        return Err(GeometryError::DegenerateRing {
            ring: index,
            distinct: distinct.len(),
        });
    }
    if ring.first() != ring.last() {
        ring.push(ring[0]);
    }
    Ok(ring)
}

// ---------------------------------------------------------------------------
// GeoJSON helpers
// ---------------------------------------------------------------------------

fn json_array(value: &Value) -> Result<&Vec<Value>, GeometryError> {
    value
        .as_array()
        .ok_or_else(|| GeometryError::Parse(format!("expected array, found {value}")))
}

fn json_polygon(value: &Value) -> Result<Vec<Ring>, GeometryError> {
    json_array(value)?.iter().map(json_ring).collect()
}

fn json_ring(value: &Value) -> Result<Ring, GeometryError> {
    json_array(value)?
        .iter()
        .map(|pair| {
            let pair = json_array(pair)?;
            if pair.len() < 2 {
                return Err(GeometryError::Parse(format!(
                    "position needs 2 coordinates, found {}",
                    pair.len()
                )));
            }
            let x = pair[0]
                .as_f64()
                .ok_or_else(|| GeometryError::Parse(format!("non-numeric coordinate {}", pair[0])))?;
            let y = pair[1]
                .as_f64()
                .ok_or_else(|| GeometryError::Parse(format!("non-numeric coordinate {}", pair[1])))?;
            Ok([x, y])
        })
        .collect()
}

// ---------------------------------------------------------------------------
// WKT
// ---------------------------------------------------------------------------

fn wkt_polygon(rings: &[Ring]) -> String {
    let rings: Vec<String> = rings
        .iter()
        .map(|ring| {
            let positions: Vec<String> = ring.iter().map(|[x, y]| format!("{x} {y}")).collect();
            format!("({})", positions.join(","))
        })
        .collect();
    format!("({})", rings.join(","))
}

struct WktParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> WktParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn error(&self, expected: &str) -> GeometryError {
        let found: String = self.rest().chars().take(16).collect();
        GeometryError::Parse(format!(
            "expected {expected} at offset {}, found '{found}'",
            self.pos
        ))
    }

    fn expect(&mut self, ch: char) -> Result<(), GeometryError> {
        self.skip_whitespace();
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            Ok(())
        } else {
            Err(self.error(&format!("'{ch}'")))
        }
    }

    /// Consumes `ch` if it is next; reports whether it did.
    fn eat(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn keyword(&mut self) -> String {
        self.skip_whitespace();
        let len = self
            .rest()
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(self.rest().len());
        let word = self.rest()[..len].to_ascii_uppercase();
        self.pos += len;
        word
    }

    fn geometry(&mut self) -> Result<Geometry, GeometryError> {
        let kind = self.keyword();
        match kind.as_str() {
            "POLYGON" => Ok(Geometry::Polygon(self.polygon()?)),
            "MULTIPOLYGON" => {
                self.expect('(')?;
                let mut polygons = vec![self.polygon()?];
                while self.eat(',') {
                    polygons.push(self.polygon()?);
                }
                self.expect(')')?;
                Ok(Geometry::MultiPolygon(polygons))
            }
            "" => Err(self.error("geometry keyword")),
            other => Err(GeometryError::UnsupportedType(other.to_string())),
        }
    }

    fn polygon(&mut self) -> Result<Vec<Ring>, GeometryError> {
        self.expect('(')?;
        let mut rings = vec![self.ring()?];
        while self.eat(',') {
            rings.push(self.ring()?);
        }
        self.expect(')')?;
        Ok(rings)
    }

    fn ring(&mut self) -> Result<Ring, GeometryError> {
        self.expect('(')?;
        let mut ring = vec![self.position()?];
        while self.eat(',') {
            ring.push(self.position()?);
        }
        self.expect(')')?;
        Ok(ring)
    }

    fn position(&mut self) -> Result<Position, GeometryError> {
        let x = self.number()?;
        let y = self.number()?;
        // Optional Z/M ordinates are accepted and dropped.
        while self.peek_number() {
            self.number()?;
        }
        Ok([x, y])
    }

    fn peek_number(&mut self) -> bool {
        self.skip_whitespace();
        self.rest()
            .starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+' || c == '.')
    }

    fn number(&mut self) -> Result<f64, GeometryError> {
        self.skip_whitespace();
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
            .unwrap_or(self.rest().len());
        if len == 0 {
            return Err(self.error("number"));
        }
        let text = &self.rest()[..len];
        let value: f64 = text
            .parse()
            .map_err(|_| GeometryError::Parse(format!("invalid number '{text}'")))?;
        self.pos += len;
        Ok(value)
    }

    fn finish(&mut self) -> Result<(), GeometryError> {
        self.skip_whitespace();
        if self.rest().is_empty() {
            Ok(())
        } else {
            Err(self.error("end of input"))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
