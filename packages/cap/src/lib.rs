#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Common Alerting Protocol (CAP) document parser.
//!
//! Extracts the fields the alert index needs from a CAP XML document:
//! `identifier`, `sent`, and the `info`/`area` contents (polygons, circles,
//! geocodes, area descriptions, altitude and ceiling). Elements are matched
//! on their local names, so any CAP namespace version is accepted.
//!
//! If a document carries several `info` blocks, the last one wins for
//! everything except the area descriptions, which are collected per
//! `info` language.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::{Value, json};

/// Language assumed for an `info` block without a `language` element.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Errors raised while reading a CAP document.
#[derive(Debug, thiserror::Error)]
pub enum CapError {
    /// The file could not be read.
    #[error("Failed to read CAP file {}: {source}", path.display())]
    Io {
        /// The file that was requested.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The document is not well-formed XML, is empty, or holds an
    /// unparseable polygon/circle.
    #[error("CAP parse error: {0}")]
    Parse(String),
}

/// A `circle` area: centre and radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    /// Centre latitude.
    pub latitude: f64,
    /// Centre longitude.
    pub longitude: f64,
    /// Radius in kilometres.
    pub radius: f64,
}

/// A `geocode` name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geocode {
    /// Code system, e.g. `"FIPS6"`.
    pub value_name: String,
    /// Code value.
    pub value: String,
}

/// The parsed contents of a CAP document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapDocument {
    /// Alert identifier.
    pub identifier: Option<String>,
    /// Sent timestamp, as written.
    pub sent: Option<String>,
    /// Area description keyed by `info` language.
    pub area_desc: BTreeMap<String, String>,
    /// Polygons in document order, each a list of `(lat, lon)` vertices.
    pub polygons: Vec<Vec<(f64, f64)>>,
    /// Circles in document order.
    pub circles: Vec<Circle>,
    /// Geocodes with both a name and a value.
    pub geocodes: Vec<Geocode>,
    /// Lower vertical limit.
    pub altitude: Option<f64>,
    /// Upper vertical limit.
    pub ceiling: Option<f64>,
}

#[derive(Debug, Default)]
struct InfoBlock {
    language: Option<String>,
    area_desc: String,
    polygons: Vec<Vec<(f64, f64)>>,
    circles: Vec<Circle>,
    geocodes: Vec<Geocode>,
    altitude: Option<f64>,
    ceiling: Option<f64>,
    value_name: String,
    value: String,
}

impl CapDocument {
    /// Parses the CAP file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CapError::Io`] if the file cannot be read, or
    /// [`CapError::Parse`] if it is not a valid CAP document.
    pub fn from_file(path: &Path) -> Result<Self, CapError> {
        log::debug!("Parsing CAP file {}", path.display());
        let xml = std::fs::read_to_string(path).map_err(|source| CapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&xml)
    }

    /// Parses CAP XML text.
    ///
    /// A document without any polygon is valid; callers decide whether that
    /// matters.
    ///
    /// # Errors
    ///
    /// Returns [`CapError::Parse`] for malformed XML, an empty document, a
    /// polygon vertex without a comma, or a circle that is not
    /// `"lat,lon radius"`.
    pub fn parse(xml: &str) -> Result<Self, CapError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut doc = Self::default();
        let mut info: Option<InfoBlock> = None;
        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut seen_root = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    enter(&mut stack, name, &mut info, &mut seen_root)?;
                    text.clear();
                }
                Ok(Event::Empty(ref e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    enter(&mut stack, name, &mut info, &mut seen_root)?;
                    text.clear();
                    leave(&mut stack, "", &mut doc, &mut info)?;
                }
                Ok(Event::End(_)) => {
                    leave(&mut stack, text.trim(), &mut doc, &mut info)?;
                    text.clear();
                }
                Ok(Event::Text(ref e)) => {
                    let unescaped = e
                        .unescape()
                        .map_err(|e| CapError::Parse(format!("bad text content: {e}")))?;
                    text.push_str(&unescaped);
                }
                Ok(Event::CData(e)) => {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(CapError::Parse(format!(
                        "malformed XML at position {}: {e}",
                        reader.buffer_position()
                    )));
                }
                _ => {}
            }
        }

        if !seen_root {
            return Err(CapError::Parse("document is empty".to_string()));
        }
        if let Some(open) = stack.last() {
            return Err(CapError::Parse(format!(
                "document ended inside <{open}>"
            )));
        }

        Ok(doc)
    }

    /// The polygons as a `GeoJSON` Feature with `(lon, lat)` coordinates.
    ///
    /// One polygon becomes a `Polygon`; several become a `MultiPolygon` in
    /// which each member is a single exterior ring. Returns `None` if the
    /// document has no polygon.
    #[must_use]
    pub fn as_geojson(&self) -> Option<Value> {
        let rings: Vec<Vec<[f64; 2]>> = self
            .polygons
            .iter()
            .filter(|polygon| !polygon.is_empty())
            .map(|polygon| polygon.iter().map(|&(lat, lon)| [lon, lat]).collect())
            .collect();

        let geometry = match rings.len() {
            0 => return None,
            1 => json!({"type": "Polygon", "coordinates": rings}),
            _ => {
                let members: Vec<Vec<Vec<[f64; 2]>>> =
                    rings.into_iter().map(|ring| vec![ring]).collect();
                json!({"type": "MultiPolygon", "coordinates": members})
            }
        };

        Some(json!({"type": "Feature", "geometry": geometry}))
    }
}

fn enter(
    stack: &mut Vec<String>,
    name: String,
    info: &mut Option<InfoBlock>,
    seen_root: &mut bool,
) -> Result<(), CapError> {
    if stack.is_empty() {
        if *seen_root {
            return Err(CapError::Parse(format!(
                "unexpected second root element <{name}>"
            )));
        }
        *seen_root = true;
    }

    if stack.len() == 1 && name == "info" {
        *info = Some(InfoBlock::default());
    }
    stack.push(name);
    Ok(())
}

fn leave(
    stack: &mut Vec<String>,
    text: &str,
    doc: &mut CapDocument,
    info: &mut Option<InfoBlock>,
) -> Result<(), CapError> {
    let path: Vec<&str> = stack.iter().skip(1).map(String::as_str).collect();

    match path.as_slice() {
        ["identifier"] => doc.identifier = non_empty(text),
        ["sent"] => doc.sent = non_empty(text),
        ["info"] => {
            if let Some(block) = info.take() {
                finish_info(doc, block);
            }
        }
        ["info", rest @ ..] => {
            if let Some(block) = info.as_mut() {
                handle_info_element(block, rest, text)?;
            }
        }
        _ => {}
    }

    stack.pop();
    Ok(())
}

fn handle_info_element(block: &mut InfoBlock, path: &[&str], text: &str) -> Result<(), CapError> {
    match path {
        ["language"] => block.language = non_empty(text),
        ["area", "polygon"] => block.polygons.push(parse_polygon(text)?),
        ["area", "circle"] => block.circles.push(parse_circle(text)?),
        ["area", "areaDesc"] => text.clone_into(&mut block.area_desc),
        ["area", "altitude"] => block.altitude = text.parse().ok(),
        ["area", "ceiling"] => block.ceiling = text.parse().ok(),
        ["area", "geocode", "valueName"] => text.clone_into(&mut block.value_name),
        ["area", "geocode", "value"] => text.clone_into(&mut block.value),
        ["area", "geocode"] => {
            let value_name = std::mem::take(&mut block.value_name);
            let value = std::mem::take(&mut block.value);
            if !value_name.is_empty() && !value.is_empty() {
                block.geocodes.push(Geocode { value_name, value });
            }
        }
        _ => {}
    }
    Ok(())
}

fn finish_info(doc: &mut CapDocument, block: InfoBlock) {
    let language = block
        .language
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    doc.area_desc.insert(language, block.area_desc);
    doc.polygons = block.polygons;
    doc.circles = block.circles;
    doc.geocodes = block.geocodes;
    doc.altitude = block.altitude;
    doc.ceiling = block.ceiling;
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

/// Parses a number, falling back to `default` for anything unparseable.
fn float_or(token: &str, default: f64) -> f64 {
    token.trim().parse().unwrap_or(default)
}

fn parse_pair(token: &str, what: &str) -> Result<(f64, f64), CapError> {
    let (lat, lon) = token
        .split_once(',')
        .ok_or_else(|| CapError::Parse(format!("{what} '{token}' is not a 'lat,lon' pair")))?;
    Ok((float_or(lat, 0.0), float_or(lon, 0.0)))
}

fn parse_polygon(text: &str) -> Result<Vec<(f64, f64)>, CapError> {
    if text.is_empty() {
        return Err(CapError::Parse("polygon element is empty".to_string()));
    }
    text.split_whitespace()
        .map(|token| parse_pair(token, "polygon vertex"))
        .collect()
}

fn parse_circle(text: &str) -> Result<Circle, CapError> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [centre, radius] = parts.as_slice() else {
        return Err(CapError::Parse(format!(
            "circle '{text}' is not 'lat,lon radius'"
        )));
    };
    let (latitude, longitude) = parse_pair(centre, "circle centre")?;
    Ok(Circle {
        latitude,
        longitude,
        radius: float_or(radius, 0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOCK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<alert xmlns="urn:oasis:names:tc:emergency:cap:1.2">
  <identifier>mockAlert</identifier>
  <sender>noreply@met.no</sender>
  <sent>2001-03-04T05:06:07+00:00</sent>
  <status>Actual</status>
  <info>
    <language>no</language>
    <event>Wind</event>
    <area>
      <areaDesc>Area1</areaDesc>
      <polygon>12,34 56,78</polygon>
      <circle>1.234,5.67 89</circle>
      <geocode>
        <valueName>value1</valueName>
        <value>123</value>
      </geocode>
      <geocode>
        <valueName>value2</valueName>
        <value>123</value>
      </geocode>
      <altitude>200</altitude>
      <ceiling>100</ceiling>
    </area>
  </info>
</alert>
"#;

    const MOCK_FAILING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<cap:alert xmlns:cap="urn:oasis:names:tc:emergency:cap:1.1">
  <cap:info>
    <cap:area>
      <cap:areaDesc>Area1</cap:areaDesc>
      <cap:polygon>abc,1.23</cap:polygon>
      <cap:circle>1.234,5.67 xyz</cap:circle>
      <cap:geocode>
        <cap:valueName>value1</cap:valueName>
        <cap:value>123</cap:value>
      </cap:geocode>
      <cap:geocode>
        <cap:valueName>value2</cap:valueName>
        <cap:value></cap:value>
      </cap:geocode>
      <cap:altitude>high</cap:altitude>
    </cap:area>
  </cap:info>
</cap:alert>
"#;

    #[test]
    fn parses_complete_document() {
        let cap = CapDocument::parse(MOCK).unwrap();
        assert_eq!(cap.identifier.as_deref(), Some("mockAlert"));
        assert_eq!(cap.sent.as_deref(), Some("2001-03-04T05:06:07+00:00"));
        assert_eq!(cap.polygons, vec![vec![(12.0, 34.0), (56.0, 78.0)]]);
        assert_eq!(
            cap.circles,
            vec![Circle {
                latitude: 1.234,
                longitude: 5.67,
                radius: 89.0
            }]
        );
        assert_eq!(
            cap.geocodes,
            vec![
                Geocode {
                    value_name: "value1".to_string(),
                    value: "123".to_string()
                },
                Geocode {
                    value_name: "value2".to_string(),
                    value: "123".to_string()
                },
            ]
        );
        assert_eq!(
            cap.area_desc,
            BTreeMap::from([("no".to_string(), "Area1".to_string())])
        );
        assert_eq!(cap.altitude, Some(200.0));
        assert_eq!(cap.ceiling, Some(100.0));
    }

    #[test]
    fn missing_and_bad_values_fall_back_to_defaults() {
        let cap = CapDocument::parse(MOCK_FAILING).unwrap();
        assert_eq!(cap.identifier, None);
        assert_eq!(cap.sent, None);
        assert_eq!(cap.polygons, vec![vec![(0.0, 1.23)]]);
        assert_eq!(
            cap.circles,
            vec![Circle {
                latitude: 1.234,
                longitude: 5.67,
                radius: 0.0
            }]
        );
        assert_eq!(cap.geocodes.len(), 1);
        assert_eq!(
            cap.area_desc,
            BTreeMap::from([("en".to_string(), "Area1".to_string())])
        );
        assert_eq!(cap.altitude, None);
        assert_eq!(cap.ceiling, None);
    }

    #[test]
    fn last_info_block_wins_but_area_desc_accumulates() {
        let xml = r"<alert>
  <identifier>two-langs</identifier>
  <info>
    <language>no</language>
    <area><areaDesc>Vestland</areaDesc><polygon>60,5 61,5 61,6 60,5</polygon></area>
  </info>
  <info>
    <language>en-GB</language>
    <area><areaDesc>Western Norway</areaDesc><polygon>1,1 2,2 1,2 1,1</polygon></area>
  </info>
</alert>";
        let cap = CapDocument::parse(xml).unwrap();
        assert_eq!(cap.polygons.len(), 1);
        assert_eq!(cap.polygons[0][0], (1.0, 1.0));
        assert_eq!(cap.area_desc.len(), 2);
        assert_eq!(cap.area_desc["no"], "Vestland");
        assert_eq!(cap.area_desc["en-GB"], "Western Norway");
    }

    #[test]
    fn document_without_polygon_is_valid() {
        let cap = CapDocument::parse("<alert><identifier>x</identifier></alert>").unwrap();
        assert!(cap.polygons.is_empty());
        assert!(cap.as_geojson().is_none());
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(CapDocument::parse(""), Err(CapError::Parse(_))));
        assert!(matches!(
            CapDocument::parse("<alert><identifier>x</sent></alert>"),
            Err(CapError::Parse(_))
        ));
        assert!(matches!(
            CapDocument::parse("<alert><identifier>x</identifier>"),
            Err(CapError::Parse(_))
        ));
        assert!(matches!(
            CapDocument::parse("<alert><info><area><polygon>1 2</polygon></area></info></alert>"),
            Err(CapError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("metalert_cap_missing.cap.xml");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            CapDocument::from_file(&path),
            Err(CapError::Io { .. })
        ));
    }

    #[test]
    fn geojson_swaps_to_lon_lat() {
        let xml = "<alert><info><area>\
            <polygon>1,1 1,2 2,2 2,1 1,1</polygon>\
            </area></info></alert>";
        let feature = CapDocument::parse(xml).unwrap().as_geojson().unwrap();
        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["geometry"]["type"], "Polygon");
        assert_eq!(
            feature["geometry"]["coordinates"],
            json!([[[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0], [1.0, 1.0]]])
        );
    }

    #[test]
    fn several_polygons_become_multipolygon() {
        let xml = "<alert><info><area>\
            <polygon>0,0 0,1 1,1 0,0</polygon>\
            <polygon>10,20 10,21 11,21 10,20</polygon>\
            </area></info></alert>";
        let feature = CapDocument::parse(xml).unwrap().as_geojson().unwrap();
        assert_eq!(feature["geometry"]["type"], "MultiPolygon");
        let coordinates = feature["geometry"]["coordinates"].as_array().unwrap();
        assert_eq!(coordinates.len(), 2);
        assert_eq!(coordinates[1][0][0], json!([20.0, 10.0]));
    }
}
