//! Area of interest carried as WGS84 WKT.
//!
//! Geometry work (reprojection, gridding, hole removal) stays outside this
//! crate. An [`Aoi`] is only what the catalogue filter needs: a polygon in
//! EPSG:4326 rendered as WKT.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Errors raised while loading an area of interest.
#[derive(Debug, Error)]
pub enum AoiError {
    /// The AOI file could not be read.
    #[error("failed to read AOI file {path}: {source}")]
    Io {
        /// AOI file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON.
    #[error("invalid GeoJSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document holds no polygonal geometry.
    #[error("no Polygon or MultiPolygon geometry found")]
    NoPolygon,

    /// A coordinate array is malformed.
    #[error("malformed coordinates: {0}")]
    Coordinates(String),

    /// WKT text does not describe a polygon.
    #[error("unsupported WKT geometry (expected POLYGON or MULTIPOLYGON): {0}")]
    UnsupportedWkt(String),
}

/// A polygonal area of interest in EPSG:4326.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aoi {
    wkt: String,
}

impl Aoi {
    /// Wraps WKT text after a light shape check.
    ///
    /// # Errors
    ///
    /// Returns [`AoiError::UnsupportedWkt`] unless the text starts with
    /// `POLYGON` or `MULTIPOLYGON`.
    pub fn from_wkt(wkt: impl Into<String>) -> Result<Self, AoiError> {
        let wkt = wkt.into().trim().to_string();
        let upper = wkt.to_ascii_uppercase();
        if !(upper.starts_with("POLYGON") || upper.starts_with("MULTIPOLYGON")) {
            return Err(AoiError::UnsupportedWkt(wkt));
        }
        Ok(Self { wkt })
    }

    /// Axis-aligned rectangle in degrees.
    #[must_use]
    pub fn from_bbox(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        let ring = [
            (xmin, ymin),
            (xmax, ymin),
            (xmax, ymax),
            (xmin, ymax),
            (xmin, ymin),
        ];
        let mut wkt = String::from("POLYGON (");
        push_ring(&mut wkt, &ring);
        wkt.push(')');
        Self { wkt }
    }

    /// Parses a GeoJSON Geometry, Feature or FeatureCollection.
    ///
    /// Polygons from every feature are merged into one MULTIPOLYGON when
    /// there is more than one.
    ///
    /// # Errors
    ///
    /// Returns [`AoiError`] for invalid JSON, malformed coordinates or when
    /// no polygonal geometry is present.
    pub fn from_geojson_str(raw: &str) -> Result<Self, AoiError> {
        let document: Value = serde_json::from_str(raw)?;
        let mut polygons = Vec::new();
        collect_polygons(&document, &mut polygons)?;

        let wkt = match polygons.as_slice() {
            [] => return Err(AoiError::NoPolygon),
            [single] => format!("POLYGON {}", polygon_body(single)),
            many => {
                let bodies: Vec<String> = many.iter().map(|p| polygon_body(p)).collect();
                format!("MULTIPOLYGON ({})", bodies.join(", "))
            }
        };
        Ok(Self { wkt })
    }

    /// Loads a `.wkt` file or a GeoJSON file.
    ///
    /// # Errors
    ///
    /// Returns [`AoiError::Io`] if the file cannot be read, otherwise the
    /// errors of the matching parser.
    pub fn from_file(path: &Path) -> Result<Self, AoiError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AoiError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_wkt = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wkt"));
        if is_wkt {
            Self::from_wkt(raw)
        } else {
            Self::from_geojson_str(&raw)
        }
    }

    /// WKT text.
    #[must_use]
    pub fn wkt(&self) -> &str {
        &self.wkt
    }
}

type Ring = Vec<(f64, f64)>;

fn collect_polygons(value: &Value, out: &mut Vec<Vec<Ring>>) -> Result<(), AoiError> {
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            for feature in value
                .get("features")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                collect_polygons(feature, out)?;
            }
        }
        Some("Feature") => {
            if let Some(geometry) = value.get("geometry") {
                collect_polygons(geometry, out)?;
            }
        }
        Some("Polygon") => out.push(parse_polygon(coordinates(value)?)?),
        Some("MultiPolygon") => {
            let polygons = coordinates(value)?
                .as_array()
                .ok_or_else(|| AoiError::Coordinates("MultiPolygon is not an array".into()))?;
            for polygon in polygons {
                out.push(parse_polygon(polygon)?);
            }
        }
        _ => {}
    }
    Ok(())
}

fn coordinates(geometry: &Value) -> Result<&Value, AoiError> {
    geometry
        .get("coordinates")
        .ok_or_else(|| AoiError::Coordinates("missing coordinates".into()))
}

fn parse_polygon(value: &Value) -> Result<Vec<Ring>, AoiError> {
    let rings = value
        .as_array()
        .ok_or_else(|| AoiError::Coordinates("polygon is not an array of rings".into()))?;
    rings.iter().map(parse_ring).collect()
}

fn parse_ring(value: &Value) -> Result<Ring, AoiError> {
    let points = value
        .as_array()
        .ok_or_else(|| AoiError::Coordinates("ring is not an array".into()))?;
    if points.len() < 4 {
        return Err(AoiError::Coordinates(format!(
            "ring has {} positions, at least 4 required",
            points.len()
        )));
    }
    points
        .iter()
        .map(|point| match point.as_array().map(Vec::as_slice) {
            Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Ok((x, y)),
                _ => Err(AoiError::Coordinates(format!("non-numeric position {point}"))),
            },
            _ => Err(AoiError::Coordinates(format!("bad position {point}"))),
        })
        .collect()
}

fn polygon_body(rings: &[Ring]) -> String {
    let mut body = String::from("(");
    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            body.push_str(", ");
        }
        push_ring(&mut body, ring);
    }
    body.push(')');
    body
}

fn push_ring(out: &mut String, ring: &[(f64, f64)]) {
    out.push('(');
    for (i, (x, y)) in ring.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{x} {y}");
    }
    out.push(')');
}
