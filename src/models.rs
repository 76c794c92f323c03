// Data model and error type for the transit map pipeline.
//
// Lines and stations both load into a `FeatureTable`: the ordered features of
// one shapefile, each carrying its (optional) geometry and the dBase attribute
// row decoded to strings. Filtered subsets are new tables sharing the source's
// column list; the source tables are never mutated.

use geo::{BoundingRect, CoordsIter, Geometry, Rect, coord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Lines,
    Stations,
}

impl FeatureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FeatureKind::Lines => "lines",
            FeatureKind::Stations => "stations",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub attributes: BTreeMap<String, String>, // column name -> decoded value, nulls are ""
}

impl Feature {
    pub fn new(geometry: Option<Geometry<f64>>) -> Self {
        Feature {
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn geometry_type(&self) -> &'static str {
        match &self.geometry {
            None => "Null",
            Some(Geometry::Point(_)) => "Point",
            Some(Geometry::MultiPoint(_)) => "MultiPoint",
            Some(Geometry::Line(_)) => "Line",
            Some(Geometry::LineString(_)) => "LineString",
            Some(Geometry::MultiLineString(_)) => "MultiLineString",
            Some(Geometry::Polygon(_)) => "Polygon",
            Some(Geometry::MultiPolygon(_)) => "MultiPolygon",
            Some(Geometry::GeometryCollection(_)) => "GeometryCollection",
            Some(Geometry::Rect(_)) => "Rect",
            Some(Geometry::Triangle(_)) => "Triangle",
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry
            .as_ref()
            .map(|g| g.coords_count())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub kind: FeatureKind,
    pub columns: Vec<String>,
    pub features: Vec<Feature>,
    pub projection: Option<String>, // raw .prj text when the sibling exists
}

impl FeatureTable {
    pub fn new(kind: FeatureKind, columns: Vec<String>) -> Self {
        FeatureTable {
            kind,
            columns,
            features: Vec::new(),
            projection: None,
        }
    }

    pub fn with_features(kind: FeatureKind, columns: Vec<String>, features: Vec<Feature>) -> Self {
        FeatureTable {
            kind,
            columns,
            features,
            projection: None,
        }
    }

    /// A table with the same schema and projection holding `features`.
    pub fn derive(&self, features: Vec<Feature>) -> Self {
        FeatureTable {
            kind: self.kind,
            columns: self.columns.clone(),
            features,
            projection: self.projection.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn require_column(&self, name: &str) -> Result<()> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(MapError::MissingAttribute(format!(
                "column '{}' not found in {} table (available: {})",
                name,
                self.kind.label(),
                self.columns.join(", ")
            )))
        }
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .filter_map(|g| g.bounding_rect())
            .fold(None, |acc, rect| merge_bounds(acc, Some(rect)))
    }
}

pub fn merge_bounds(a: Option<Rect<f64>>, b: Option<Rect<f64>>) -> Option<Rect<f64>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Rect::new(
            coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
            coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
        )),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum MapError {
    FileNotFound(String),
    ParseError(String),
    MissingAttribute(String),
    MissingColorMapping(String),
    ConfigError(String),
    NetworkError(String),
    FileError(String),
    RenderError(String),
}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::FileNotFound(e) => write!(f, "File not found: {}", e),
            MapError::ParseError(e) => write!(f, "Parse error: {}", e),
            MapError::MissingAttribute(e) => write!(f, "Missing attribute: {}", e),
            MapError::MissingColorMapping(e) => write!(f, "Missing color mapping: {}", e),
            MapError::ConfigError(e) => write!(f, "Config error: {}", e),
            MapError::NetworkError(e) => write!(f, "Network error: {}", e),
            MapError::FileError(e) => write!(f, "File error: {}", e),
            MapError::RenderError(e) => write!(f, "Render error: {}", e),
        }
    }
}

impl std::error::Error for MapError {}

pub type Result<T> = std::result::Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, MultiLineString, Point};

    fn segment(points: &[(f64, f64)]) -> Geometry<f64> {
        Geometry::MultiLineString(MultiLineString::new(vec![LineString::from(points.to_vec())]))
    }

    #[test]
    fn require_column_reports_missing_attribute() {
        let table = FeatureTable::new(FeatureKind::Lines, vec!["NAME".to_string()]);
        assert!(table.require_column("NAME").is_ok());
        match table.require_column("TECHNOLGY") {
            Err(MapError::MissingAttribute(msg)) => assert!(msg.contains("TECHNOLGY")),
            other => panic!("expected MissingAttribute, got {:?}", other),
        }
    }

    #[test]
    fn bounding_rect_spans_all_geometries() {
        let table = FeatureTable::with_features(
            FeatureKind::Lines,
            vec![],
            vec![
                Feature::new(Some(segment(&[(0.0, 0.0), (2.0, 1.0)]))),
                Feature::new(None),
                Feature::new(Some(Geometry::Point(Point::new(-1.0, 5.0)))),
            ],
        );
        let rect = table.bounding_rect().unwrap();
        assert_eq!(rect.min().x, -1.0);
        assert_eq!(rect.min().y, 0.0);
        assert_eq!(rect.max().x, 2.0);
        assert_eq!(rect.max().y, 5.0);
    }

    #[test]
    fn bounding_rect_of_empty_table_is_none() {
        let table = FeatureTable::new(FeatureKind::Stations, vec![]);
        assert!(table.bounding_rect().is_none());
    }

    #[test]
    fn geometry_type_and_vertices() {
        let feature = Feature::new(Some(segment(&[(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)])));
        assert_eq!(feature.geometry_type(), "MultiLineString");
        assert_eq!(feature.vertex_count(), 3);
        assert_eq!(Feature::new(None).vertex_count(), 0);
    }

    #[test]
    fn derive_keeps_schema() {
        let mut table = FeatureTable::new(FeatureKind::Lines, vec!["NAME".to_string()]);
        table.projection = Some("GEOGCS[\"WGS 84\"]".to_string());
        let derived = table.derive(vec![Feature::new(None).with_attribute("NAME", "X")]);
        assert_eq!(derived.columns, table.columns);
        assert_eq!(derived.projection, table.projection);
        assert_eq!(derived.len(), 1);
    }
}
