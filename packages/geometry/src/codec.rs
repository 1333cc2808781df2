//! `GeoJSON` polygon decoding/encoding and planar measures.

use std::path::{Path, PathBuf};

use geo::{Area, BooleanOps, BoundingRect, MultiPolygon, Polygon, Simplify};
use geojson::GeoJson;
use metalert_models::BoundingBox;
use serde_json::{Map, Value};

use crate::GeometryError;

/// Keys of an encoded Feature that extra properties may not overwrite.
pub const RESERVED_KEYS: &[&str] = &["type", "geometry"];

/// Where [`decode`] reads its input from.
#[derive(Debug, Clone, Copy)]
pub enum GeometrySource<'a> {
    /// An already-parsed JSON value: a geometry object, or a Feature whose
    /// `geometry` key holds one.
    Json(&'a Value),
    /// A file containing such a JSON value.
    File(&'a Path),
}

impl<'a> From<&'a Value> for GeometrySource<'a> {
    fn from(value: &'a Value) -> Self {
        Self::Json(value)
    }
}

impl<'a> From<&'a Path> for GeometrySource<'a> {
    fn from(path: &'a Path) -> Self {
        Self::File(path)
    }
}

impl<'a> From<&'a PathBuf> for GeometrySource<'a> {
    fn from(path: &'a PathBuf) -> Self {
        Self::File(path.as_path())
    }
}

/// A decoded polygon, keeping track of whether it was a single Polygon or a
/// `MultiPolygon` so it encodes back to the same type.
#[derive(Debug, Clone, PartialEq)]
pub enum PolygonShape {
    /// A single polygon (exterior ring plus holes).
    Polygon(Polygon<f64>),
    /// Several polygons.
    MultiPolygon(MultiPolygon<f64>),
}

impl PolygonShape {
    /// The shape as a `MultiPolygon`, wrapping a single polygon if needed.
    #[must_use]
    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        match self {
            Self::Polygon(p) => MultiPolygon(vec![p.clone()]),
            Self::MultiPolygon(mp) => mp.clone(),
        }
    }

    /// `GeoJSON` geometry object (`{"type": ..., "coordinates": ...}`).
    #[must_use]
    pub fn to_geojson(&self) -> Value {
        let value = match self {
            Self::Polygon(p) => geojson::Value::from(p),
            Self::MultiPolygon(mp) => geojson::Value::from(mp),
        };
        Value::Object(geojson::JsonObject::from(&geojson::Geometry::new(value)))
    }

    /// Planar (unsigned) area.
    #[must_use]
    pub fn area(&self) -> f64 {
        match self {
            Self::Polygon(p) => p.unsigned_area(),
            Self::MultiPolygon(mp) => mp.unsigned_area(),
        }
    }

    /// Bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidGeometry`] for an empty shape.
    pub fn bounds(&self) -> Result<BoundingBox, GeometryError> {
        let rect = match self {
            Self::Polygon(p) => p.bounding_rect(),
            Self::MultiPolygon(mp) => mp.bounding_rect(),
        }
        .ok_or_else(|| GeometryError::InvalidGeometry("polygon has no coordinates".to_string()))?;

        Ok(BoundingBox::new(
            rect.min().x,
            rect.min().y,
            rect.max().x,
            rect.max().y,
        ))
    }

    /// Planar area of the intersection of `self` and `other`.
    #[must_use]
    pub fn intersection_area(&self, other: &Self) -> f64 {
        self.to_multi_polygon()
            .intersection(&other.to_multi_polygon())
            .unsigned_area()
    }

    /// Ramer-Douglas-Peucker simplification with the given tolerance.
    #[must_use]
    pub fn simplify(&self, tolerance: f64) -> Self {
        match self {
            Self::Polygon(p) => Self::Polygon(p.simplify(tolerance)),
            Self::MultiPolygon(mp) => Self::MultiPolygon(mp.simplify(tolerance)),
        }
    }
}

/// Decodes a Polygon or `MultiPolygon` from a JSON value or a file.
///
/// A Feature (any object with a `geometry` key) is unwrapped first.
///
/// # Errors
///
/// * [`GeometryError::SourceUnavailable`] if the file cannot be read
/// * [`GeometryError::MalformedInput`] if the value is not a JSON object, or
///   the file does not contain JSON
/// * [`GeometryError::InvalidGeometry`] if the object is not a valid
///   Polygon or `MultiPolygon`
pub fn decode<'a>(input: impl Into<GeometrySource<'a>>) -> Result<PolygonShape, GeometryError> {
    match input.into() {
        GeometrySource::Json(value) => decode_value(value),
        GeometrySource::File(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                log::error!("{} could not be read: {e}", path.display());
                GeometryError::SourceUnavailable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            })?;
            let value: Value = serde_json::from_str(&contents).map_err(|e| {
                GeometryError::MalformedInput(format!("{}: {e}", path.display()))
            })?;
            decode_value(&value)
        }
    }
}

/// Decodes a Polygon or `MultiPolygon` from JSON text.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_str(text: &str) -> Result<PolygonShape, GeometryError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| GeometryError::MalformedInput(e.to_string()))?;
    decode_value(&value)
}

fn decode_value(value: &Value) -> Result<PolygonShape, GeometryError> {
    let Value::Object(object) = value else {
        return Err(GeometryError::MalformedInput(format!(
            "expected a JSON object, got {}",
            json_kind(value)
        )));
    };

    let geometry = object.get("geometry").unwrap_or(value);

    let geojson = GeoJson::from_json_value(geometry.clone())
        .map_err(|e| GeometryError::InvalidGeometry(format!("not a valid GeoJSON object: {e}")))?;

    let GeoJson::Geometry(geometry) = geojson else {
        return Err(GeometryError::InvalidGeometry(
            "expected a GeoJSON geometry".to_string(),
        ));
    };

    let geo_geom: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e| GeometryError::InvalidGeometry(format!("{e}")))?;

    match geo_geom {
        geo::Geometry::Polygon(p) => Ok(PolygonShape::Polygon(p)),
        geo::Geometry::MultiPolygon(mp) => Ok(PolygonShape::MultiPolygon(mp)),
        other => Err(GeometryError::InvalidGeometry(format!(
            "expected Polygon or MultiPolygon, got {}",
            geometry_kind(&other)
        ))),
    }
}

/// Wraps `polygon` into a `GeoJSON` Feature, merging `extra` into the
/// top-level object.
///
/// If `extra` contains a reserved key (`type` or `geometry`) nothing is
/// merged and a warning is logged.
#[must_use]
pub fn encode(polygon: &PolygonShape, extra: &Map<String, Value>) -> Value {
    let mut feature = Map::new();
    feature.insert("type".to_string(), Value::from("Feature"));
    feature.insert("geometry".to_string(), polygon.to_geojson());

    if RESERVED_KEYS.iter().any(|key| extra.contains_key(*key)) {
        log::warn!("Cannot append extra arguments due to overlap in keys.");
    } else {
        feature.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    Value::Object(feature)
}

/// Planar area of `polygon`.
#[must_use]
pub fn area(polygon: &PolygonShape) -> f64 {
    polygon.area()
}

/// Bounding box of `polygon`.
///
/// # Errors
///
/// Returns [`GeometryError::InvalidGeometry`] for an empty polygon.
pub fn bounds(polygon: &PolygonShape) -> Result<BoundingBox, GeometryError> {
    polygon.bounds()
}

/// Planar area of the intersection of `a` and `b`.
#[must_use]
pub fn intersection_area(a: &PolygonShape, b: &PolygonShape) -> f64 {
    a.intersection_area(b)
}

/// Simplifies `polygon` with the given tolerance.
#[must_use]
pub fn simplify(polygon: &PolygonShape, tolerance: f64) -> PolygonShape {
    polygon.simplify(tolerance)
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

const fn geometry_kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit_square() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0], [1.0, 1.0]]]
        })
    }

    #[test]
    fn decodes_polygon_and_measures_it() {
        let shape = decode(&unit_square()).unwrap();
        assert!(matches!(shape, PolygonShape::Polygon(_)));
        assert!((area(&shape) - 1.0).abs() < 1e-12);
        assert_eq!(bounds(&shape).unwrap(), BoundingBox::new(1.0, 1.0, 2.0, 2.0));
    }

    #[test]
    fn unwraps_features() {
        let feature = json!({"type": "Feature", "properties": {}, "geometry": unit_square()});
        let shape = decode(&feature).unwrap();
        assert!((shape.area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_polygons() {
        let point = json!({"type": "Point", "coordinates": [1.0, 2.0]});
        assert!(matches!(
            decode(&point),
            Err(GeometryError::InvalidGeometry(_))
        ));

        let garbage = json!({"foo": "bar"});
        assert!(matches!(
            decode(&garbage),
            Err(GeometryError::InvalidGeometry(_))
        ));

        assert!(matches!(
            decode(&json!([1, 2, 3])),
            Err(GeometryError::MalformedInput(_))
        ));
    }

    #[test]
    fn missing_file_is_source_unavailable() {
        let path = std::env::temp_dir().join("metalert_codec_missing.geojson");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            decode(&path),
            Err(GeometryError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn reads_geometry_from_file() {
        let dir = std::env::temp_dir().join("metalert_codec_file");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let path = dir.join("square.geojson");
        std::fs::write(&path, unit_square().to_string()).unwrap();
        assert!((decode(&path).unwrap().area() - 1.0).abs() < 1e-12);

        let bad = dir.join("bad.geojson");
        std::fs::write(&bad, "not json").unwrap();
        assert!(matches!(
            decode(&bad),
            Err(GeometryError::MalformedInput(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn encode_round_trips_geometry() {
        let multi = json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]],
                [[[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 5.0]]]
            ]
        });

        for input in [unit_square(), multi] {
            let encoded = encode(&decode(&input).unwrap(), &Map::new());
            assert_eq!(encoded["type"], "Feature");
            assert_eq!(encoded["geometry"], input);
        }
    }

    #[test]
    fn encode_refuses_reserved_extra_keys() {
        let shape = decode(&unit_square()).unwrap();

        let mut extra = Map::new();
        extra.insert("properties".to_string(), json!({"name": "Oslo"}));
        let encoded = encode(&shape, &extra);
        assert_eq!(encoded["properties"]["name"], "Oslo");

        extra.insert("type".to_string(), json!("Bogus"));
        let encoded = encode(&shape, &extra);
        assert_eq!(encoded["type"], "Feature");
        assert!(encoded.get("properties").is_none());
    }

    #[test]
    fn intersection_area_of_overlapping_squares() {
        let a = decode_str(
            r#"{"type":"Polygon","coordinates":[[[0,0],[2,0],[2,2],[0,2],[0,0]]]}"#,
        )
        .unwrap();
        let b = decode_str(
            r#"{"type":"Polygon","coordinates":[[[1,1],[3,1],[3,3],[1,3],[1,1]]]}"#,
        )
        .unwrap();
        let c = decode_str(
            r#"{"type":"Polygon","coordinates":[[[5,5],[6,5],[6,6],[5,6],[5,5]]]}"#,
        )
        .unwrap();

        assert!((intersection_area(&a, &b) - 1.0).abs() < 1e-9);
        assert!(intersection_area(&a, &c).abs() < 1e-12);
    }

    #[test]
    fn simplify_drops_collinear_vertices() {
        let shape = decode_str(
            r#"{"type":"Polygon","coordinates":[[[0,0],[1,0.001],[2,0],[2,2],[0,2],[0,0]]]}"#,
        )
        .unwrap();
        let PolygonShape::Polygon(simple) = simplify(&shape, 0.01) else {
            panic!("expected a polygon");
        };
        assert_eq!(simple.exterior().0.len(), 5);
    }
}
