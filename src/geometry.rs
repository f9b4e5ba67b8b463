//! Geometry Codec: dual-format storage of location and feature payloads.
//!
//! A payload whose encoding type is a recognized GeoJSON encoding is stored
//! twice: verbatim in the payload column, and as a native geometry built by
//! PostGIS from a normalized copy (feature wrapper removed, CRS tag added,
//! forced to 2D). Anything else only lands in the payload column.
//!
//! Validation is two-stage. The loose stage accepts anything shaped like
//! GeoJSON; the strict stage rejects geometries PostGIS would build but that
//! are not well-formed (unclosed or self-intersecting rings, short lines,
//! non-finite coordinates).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{StaError, StaResult};

/// GeoJSON media types, lower case.
pub const GEOJSON_ENCODINGS: [&str; 3] = [
    "application/vnd.geo+json",
    "application/geo+json",
    "application/geojson",
];

/// Every native geometry is normalized to WGS84.
pub const DEFAULT_SRID: i32 = 4326;
const DEFAULT_CRS_NAME: &str = "EPSG:4326";

// ---

pub type Position = Vec<f64>;

/// Loosely parsed GeoJSON geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<Geometry> },
}

/// The two column values written for a geometry-bearing entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedGeometry {
    /// Serialized payload as supplied by the caller.
    pub payload: String,
    /// Normalized GeoJSON for `ST_GeomFromGeoJSON`, or `None` to clear the column.
    pub native: Option<String>,
}

/// Encoder/decoder for geometry payloads.
///
/// Constructed once and handed to the mutation engine; there is no
/// process-wide instance.
#[derive(Debug, Clone)]
pub struct GeometryCodec {
    encodings: BTreeSet<String>,
}

impl Default for GeometryCodec {
    fn default() -> Self {
        Self::new(GEOJSON_ENCODINGS)
    }
}

impl GeometryCodec {
    // ---
    pub fn new<I, S>(encodings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            encodings: encodings
                .into_iter()
                .map(|e| e.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Case-insensitive membership test against the recognized encodings.
    pub fn is_geo_encoding(&self, encoding_type: &str) -> bool {
        self.encodings.contains(&encoding_type.to_ascii_lowercase())
    }

    /// Produce the payload and native column values for `payload`.
    pub fn encode(&self, payload: &Value, encoding_type: &str) -> StaResult<EncodedGeometry> {
        // ---
        let text = serde_json::to_string(payload)?;
        if !self.is_geo_encoding(encoding_type) {
            return Ok(EncodedGeometry {
                payload: text,
                native: None,
            });
        }

        let geometry_value = unwrap_feature(payload)?;
        let geometry = Geometry::from_value(geometry_value)?;
        geometry.validate()?;

        let mut native = serde_json::to_value(geometry.to_2d())?;
        let crs = geometry_value
            .get("crs")
            .cloned()
            .unwrap_or_else(default_crs);
        if let Value::Object(map) = &mut native {
            map.insert("crs".to_string(), crs);
        }

        Ok(EncodedGeometry {
            payload: text,
            native: Some(native.to_string()),
        })
    }

    /// Rebuild a payload from stored or caller-supplied text.
    ///
    /// Used when an update carries a new payload but relies on the stored
    /// encoding type. Geospatial payloads are checked to be GeoJSON; other
    /// payloads are returned as JSON when they parse, else as a string.
    pub fn decode(&self, encoding_type: &str, text: &str) -> StaResult<Value> {
        // ---
        if self.is_geo_encoding(encoding_type) {
            let value: Value = serde_json::from_str(text).map_err(|e| {
                StaError::illegal_argument(format!(
                    "encoding specifies geoJson, but payload is not parsable as such: {e}"
                ))
            })?;
            Geometry::from_value(unwrap_feature(&value)?)?;
            return Ok(value);
        }
        Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
    }

    /// Re-derive a payload value under a (possibly different) encoding.
    pub fn reparse(&self, encoding_type: &str, payload: &Value) -> StaResult<Value> {
        match payload {
            Value::String(s) => self.decode(encoding_type, s),
            other => self.decode(encoding_type, &serde_json::to_string(other)?),
        }
    }
}

fn default_crs() -> Value {
    json!({ "type": "name", "properties": { "name": DEFAULT_CRS_NAME } })
}

/// PostGIS has no Feature type; only the inner geometry goes native.
fn unwrap_feature(value: &Value) -> StaResult<&Value> {
    // ---
    match value.get("type").and_then(Value::as_str) {
        Some("Feature") => value
            .get("geometry")
            .filter(|g| g.is_object())
            .ok_or_else(|| StaError::illegal_argument("Feature without a geometry.")),
        Some("FeatureCollection") => Err(StaError::illegal_argument(
            "FeatureCollection can not be stored as a geometry.",
        )),
        Some(_) => Ok(value),
        None => Err(StaError::illegal_argument(
            "encoding specifies geoJson, but location not parsable as such.",
        )),
    }
}

// ---

impl Geometry {
    // ---
    /// Loose stage: shape only.
    pub fn from_value(value: &Value) -> StaResult<Self> {
        Geometry::deserialize(value)
            .map_err(|e| StaError::illegal_argument(format!("Invalid geoJson: {e}")))
    }

    /// Strict stage: well-formedness.
    pub fn validate(&self) -> StaResult<()> {
        // ---
        match self {
            Geometry::Point { coordinates } => check_position(coordinates),
            Geometry::MultiPoint { coordinates } => coordinates.iter().try_for_each(|p| check_position(p)),
            Geometry::LineString { coordinates } => check_line(coordinates),
            Geometry::MultiLineString { coordinates } => coordinates.iter().try_for_each(|l| check_line(l)),
            Geometry::Polygon { coordinates } => check_polygon(coordinates),
            Geometry::MultiPolygon { coordinates } => coordinates.iter().try_for_each(|p| check_polygon(p)),
            Geometry::GeometryCollection { geometries } => {
                geometries.iter().try_for_each(Geometry::validate)
            }
        }
    }

    /// Drop every ordinate past the second.
    pub fn to_2d(&self) -> Geometry {
        // ---
        fn p(pos: &Position) -> Position {
            pos.iter().take(2).copied().collect()
        }
        fn line(l: &[Position]) -> Vec<Position> {
            l.iter().map(p).collect()
        }
        fn poly(rings: &[Vec<Position>]) -> Vec<Vec<Position>> {
            rings.iter().map(|r| line(r)).collect()
        }

        match self {
            Geometry::Point { coordinates } => Geometry::Point { coordinates: p(coordinates) },
            Geometry::MultiPoint { coordinates } => Geometry::MultiPoint { coordinates: line(coordinates) },
            Geometry::LineString { coordinates } => Geometry::LineString { coordinates: line(coordinates) },
            Geometry::MultiLineString { coordinates } => Geometry::MultiLineString {
                coordinates: poly(coordinates),
            },
            Geometry::Polygon { coordinates } => Geometry::Polygon { coordinates: poly(coordinates) },
            Geometry::MultiPolygon { coordinates } => Geometry::MultiPolygon {
                coordinates: coordinates.iter().map(|c| poly(c)).collect(),
            },
            Geometry::GeometryCollection { geometries } => Geometry::GeometryCollection {
                geometries: geometries.iter().map(Geometry::to_2d).collect(),
            },
        }
    }
}

fn check_position(pos: &[f64]) -> StaResult<()> {
    // ---
    if pos.len() < 2 {
        return Err(StaError::illegal_argument(
            "Invalid geoJson: a position needs at least two ordinates.",
        ));
    }
    if pos.iter().any(|v| !v.is_finite()) {
        return Err(StaError::illegal_argument(
            "Invalid geoJson: non-finite ordinate.",
        ));
    }
    Ok(())
}

fn check_line(line: &[Position]) -> StaResult<()> {
    // ---
    if line.len() < 2 {
        return Err(StaError::illegal_argument(
            "Invalid geoJson: a LineString needs at least two positions.",
        ));
    }
    line.iter().try_for_each(|p| check_position(p))
}

fn check_polygon(rings: &[Vec<Position>]) -> StaResult<()> {
    // ---
    if rings.is_empty() {
        return Err(StaError::illegal_argument(
            "Invalid geoJson: a Polygon needs an exterior ring.",
        ));
    }
    for ring in rings {
        ring.iter().try_for_each(|p| check_position(p))?;
        if ring.len() < 4 {
            return Err(StaError::illegal_argument(
                "Invalid geoJson: a linear ring needs at least four positions.",
            ));
        }
        let (first, last) = (&ring[0], &ring[ring.len() - 1]);
        if first[0] != last[0] || first[1] != last[1] {
            return Err(StaError::illegal_argument(
                "Invalid geoJson: linear ring is not closed.",
            ));
        }
        if ring_self_intersects(ring) {
            return Err(StaError::illegal_argument(
                "Invalid geoJson: linear ring self-intersects.",
            ));
        }
    }
    Ok(())
}

/// Pairwise test of non-adjacent ring segments. Repeated consecutive
/// vertices form zero-length segments and are skipped.
fn ring_self_intersects(ring: &[Position]) -> bool {
    // ---
    let mut ring: Vec<&Position> = ring.iter().collect();
    ring.dedup_by(|a, b| a[0] == b[0] && a[1] == b[1]);
    if ring.len() < 4 {
        return false;
    }
    let n = ring.len() - 1;
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if segments_intersect(ring[i], ring[i + 1], ring[j], ring[j + 1]) {
                return true;
            }
        }
    }
    false
}

fn segments_intersect(a: &[f64], b: &[f64], c: &[f64], d: &[f64]) -> bool {
    // ---
    fn orient(p: &[f64], q: &[f64], r: &[f64]) -> f64 {
        (q[0] - p[0]) * (r[1] - p[1]) - (q[1] - p[1]) * (r[0] - p[0])
    }
    fn on_segment(p: &[f64], q: &[f64], r: &[f64]) -> bool {
        r[0] >= p[0].min(q[0]) && r[0] <= p[0].max(q[0]) && r[1] >= p[1].min(q[1]) && r[1] <= p[1].max(q[1])
    }

    let d1 = orient(c, d, a);
    let d2 = orient(c, d, b);
    let d3 = orient(a, b, c);
    let d4 = orient(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(c, d, a))
        || (d2 == 0.0 && on_segment(c, d, b))
        || (d3 == 0.0 && on_segment(a, b, c))
        || (d4 == 0.0 && on_segment(a, b, d))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn codec() -> GeometryCodec {
        GeometryCodec::default()
    }

    #[test]
    fn encoding_match_is_case_insensitive() {
        // ---
        assert!(codec().is_geo_encoding("application/VND.GEO+JSON"));
        assert!(!codec().is_geo_encoding("text/plain"));
    }

    #[test]
    fn non_geo_payload_clears_native_column() {
        // ---
        let encoded = codec()
            .encode(&json!("Room 101"), "text/plain")
            .unwrap();
        assert_eq!(encoded.payload, "\"Room 101\"");
        assert_eq!(encoded.native, None);
    }

    #[test]
    fn feature_wrapper_is_unwrapped_and_crs_injected() {
        // ---
        let payload = json!({
            "type": "Feature",
            "properties": { "floor": 2 },
            "geometry": { "type": "Point", "coordinates": [8.4, 49.0, 115.0] }
        });
        let encoded = codec()
            .encode(&payload, "application/vnd.geo+json")
            .unwrap();

        assert_eq!(serde_json::from_str::<Value>(&encoded.payload).unwrap(), payload);
        let native: Value = serde_json::from_str(encoded.native.as_deref().unwrap()).unwrap();
        assert_eq!(native["type"], "Point");
        assert_eq!(native["coordinates"], json!([8.4, 49.0]));
        assert_eq!(native["crs"]["properties"]["name"], "EPSG:4326");
    }

    #[test]
    fn supplied_crs_is_kept() {
        // ---
        let payload = json!({
            "type": "Point",
            "coordinates": [500000.0, 5400000.0],
            "crs": { "type": "name", "properties": { "name": "EPSG:32632" } }
        });
        let encoded = codec().encode(&payload, "application/geo+json").unwrap();
        let native: Value = serde_json::from_str(encoded.native.as_deref().unwrap()).unwrap();
        assert_eq!(native["crs"]["properties"]["name"], "EPSG:32632");
    }

    #[test]
    fn bow_tie_polygon_is_rejected() {
        // ---
        let payload = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 1.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]]]
        });
        let err = codec()
            .encode(&payload, "application/vnd.geo+json")
            .unwrap_err();
        assert!(matches!(err, StaError::IllegalArgument(_)));
    }

    #[test]
    fn repeated_vertex_is_not_a_self_intersection() {
        // ---
        let payload = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
        });
        let encoded = codec().encode(&payload, "application/geo+json").unwrap();
        assert!(encoded.native.is_some());
    }

    #[test]
    fn unclosed_and_short_rings_are_rejected() {
        // ---
        let open = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]
        });
        let short = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]]
        });
        assert!(codec().encode(&open, "application/geo+json").is_err());
        assert!(codec().encode(&short, "application/geo+json").is_err());
    }

    #[test]
    fn valid_square_passes() {
        // ---
        let square = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
        });
        assert!(codec().encode(&square, "application/geo+json").is_ok());
    }

    #[test]
    fn non_geojson_under_geo_encoding_is_rejected() {
        // ---
        let err = codec()
            .encode(&json!({ "lat": 1, "lon": 2 }), "application/vnd.geo+json")
            .unwrap_err();
        assert!(matches!(err, StaError::IllegalArgument(_)));
    }

    #[test]
    fn native_round_trip_is_2d_and_equivalent() {
        // ---
        let payload = json!({
            "type": "LineString",
            "coordinates": [[1.000001, 2.5, 10.0], [3.25, -4.75, 11.0]]
        });
        let c = codec();
        let encoded = c.encode(&payload, "application/vnd.geo+json").unwrap();
        let decoded = c
            .decode("application/vnd.geo+json", encoded.native.as_deref().unwrap())
            .unwrap();

        let Geometry::LineString { coordinates } = Geometry::from_value(&decoded).unwrap() else {
            panic!("expected a line string");
        };
        let expected = [[1.000001, 2.5], [3.25, -4.75]];
        assert_eq!(coordinates.len(), expected.len());
        for (got, want) in coordinates.iter().zip(expected.iter()) {
            assert_eq!(got.len(), 2);
            assert!((got[0] - want[0]).abs() < 1e-9);
            assert!((got[1] - want[1]).abs() < 1e-9);
        }
        assert_eq!(decoded["crs"]["properties"]["name"], "EPSG:4326");
    }

    #[test]
    fn decode_falls_back_to_text_for_opaque_encodings() {
        // ---
        let c = codec();
        assert_eq!(c.decode("text/plain", "Room 101").unwrap(), json!("Room 101"));
        assert_eq!(c.decode("text/plain", "{\"a\":1}").unwrap(), json!({ "a": 1 }));
        assert!(c.decode("application/geo+json", "Room 101").is_err());
    }
}
