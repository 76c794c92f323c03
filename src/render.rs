// Map rendering.
//
// Lines and stations are projected onto a fixed-size canvas and drawn as a
// `Scene` of colored polylines and dots. The scene is rasterised into an RGBA
// pixel buffer (PNG output) or written out as SVG. All styling arrives with
// the call; there is no process-wide theme. The canvas carries no axes,
// ticks, titles, legend, caption or grid lines.

use crate::models::{FeatureTable, MapError, Result, merge_bounds};
use crate::rules::DEFAULT_NAME_ATTRIBUTE;
use geo::{Coord, Geometry, LineString, Point, Rect};
use image::{ImageFormat, RgbaImage};
use log::{debug, warn};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Cursor;
use std::path::Path;

// ============================================================================
// Colors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Rgba([r, g, b, 255])
    }

    /// `#RRGGBB`, `RRGGBB`, `#RRGGBBAA`, or a basic CSS color name.
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if let Some(named) = Self::named(&value.to_ascii_lowercase()) {
            return Ok(named);
        }

        let hex = value.strip_prefix('#').unwrap_or(value);
        if !(hex.len() == 6 || hex.len() == 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MapError::ConfigError(format!("invalid color '{}'", raw)));
        }

        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
        let parsed = (|| -> std::result::Result<Rgba, std::num::ParseIntError> {
            let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
            Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
        })();

        parsed.map_err(|e| MapError::ConfigError(format!("invalid color '{}': {}", raw, e)))
    }

    fn named(name: &str) -> Option<Self> {
        let color = match name {
            "white" => Rgba::rgb(255, 255, 255),
            "black" => Rgba::rgb(0, 0, 0),
            "red" => Rgba::rgb(255, 0, 0),
            "green" => Rgba::rgb(0, 128, 0),
            "blue" => Rgba::rgb(0, 0, 255),
            "yellow" => Rgba::rgb(255, 255, 0),
            "orange" => Rgba::rgb(255, 165, 0),
            "purple" => Rgba::rgb(128, 0, 128),
            "pink" => Rgba::rgb(255, 192, 203),
            "brown" => Rgba::rgb(165, 42, 42),
            "grey" | "gray" => Rgba::rgb(128, 128, 128),
            "darkgrey" | "darkgray" => Rgba::rgb(169, 169, 169),
            "lightblue" => Rgba::rgb(173, 216, 230),
            "turquoise" => Rgba::rgb(64, 224, 208),
            _ => return None,
        };
        Some(color)
    }

    pub fn to_hex(&self) -> String {
        let [r, g, b, a] = self.0;
        if a == 255 {
            format!("#{:02x}{:02x}{:02x}", r, g, b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", r, g, b, a)
        }
    }
}

impl Serialize for Rgba {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// What to do with a line whose name has no entry in the color table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MissingColorPolicy {
    /// Draw it in the style's `default_line_color`.
    #[default]
    Default,
    /// Abort with `MissingColorMapping`.
    Fail,
}

pub struct ColorTable {
    entries: BTreeMap<String, Rgba>,
}

impl ColorTable {
    pub fn from_config(colors: &BTreeMap<String, String>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (name, raw) in colors {
            let color = Rgba::parse(raw)
                .map_err(|e| MapError::ConfigError(format!("color for '{}': {}", name, e)))?;
            entries.insert(name.clone(), color);
        }
        Ok(ColorTable { entries })
    }

    pub fn get(&self, name: &str) -> Option<Rgba> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Color for every distinct line name in `lines`.
    pub fn assign(
        &self,
        lines: &FeatureTable,
        name_attribute: &str,
        policy: MissingColorPolicy,
        fallback: Rgba,
    ) -> Result<BTreeMap<String, Rgba>> {
        lines.require_column(name_attribute)?;

        let names: BTreeSet<&str> = lines
            .iter()
            .map(|f| f.attribute(name_attribute).unwrap_or(""))
            .collect();

        let mut assignments = BTreeMap::new();
        for name in names {
            let color = match (self.get(name), policy) {
                (Some(color), _) => color,
                (None, MissingColorPolicy::Default) => {
                    warn!("⚠️  No color for line '{}', using {}", name, fallback.to_hex());
                    fallback
                }
                (None, MissingColorPolicy::Fail) => {
                    return Err(MapError::MissingColorMapping(format!(
                        "no color for line '{}'",
                        name
                    )));
                }
            };
            assignments.insert(name.to_string(), color);
        }
        Ok(assignments)
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderStyle {
    pub width: u32,
    pub height: u32,
    pub padding: u32,
    pub background: String,
    pub line_width: f32,
    pub station_radius: f32,
    pub station_color: String,
    pub default_line_color: String,
}

/// Largest width or height accepted for a canvas, in pixels.
pub const MAX_CANVAS_SIZE: u32 = 16384;

impl Default for RenderStyle {
    fn default() -> Self {
        RenderStyle {
            width: 1600,
            height: 1600,
            padding: 40,
            background: "#111111".to_string(),
            line_width: 3.0,
            station_radius: 3.5,
            station_color: "white".to_string(),
            default_line_color: "#808080".to_string(),
        }
    }
}

impl RenderStyle {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MapError::ConfigError("canvas size must be non-zero".to_string()));
        }
        if self.width > MAX_CANVAS_SIZE || self.height > MAX_CANVAS_SIZE {
            return Err(MapError::ConfigError(format!(
                "canvas {}x{} exceeds the {}px limit",
                self.width, self.height, MAX_CANVAS_SIZE
            )));
        }
        if self.padding.saturating_mul(2) >= self.width.min(self.height) {
            return Err(MapError::ConfigError(format!(
                "padding {} leaves no room on a {}x{} canvas",
                self.padding, self.width, self.height
            )));
        }
        if !(self.line_width > 0.0) || !(self.station_radius >= 0.0) {
            return Err(MapError::ConfigError(
                "line width must be positive and station radius non-negative".to_string(),
            ));
        }
        for color in [&self.background, &self.station_color, &self.default_line_color] {
            Rgba::parse(color)?;
        }
        Ok(())
    }
}

fn default_name_attribute() -> String {
    DEFAULT_NAME_ATTRIBUTE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Subset drawn by default.
    pub subset: String,
    #[serde(default = "default_name_attribute")]
    pub name_attribute: String,
    #[serde(default)]
    pub colors: BTreeMap<String, String>,
    #[serde(default)]
    pub missing_color: MissingColorPolicy,
    #[serde(default)]
    pub style: RenderStyle,
}

// ============================================================================
// Projection
// ============================================================================

/// Linear map from data coordinates to pixels: aspect ratio kept, y flipped,
/// content centered inside the padding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    min_x: f64,
    max_y: f64,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Projection {
    pub fn fit(bounds: Rect<f64>, style: &RenderStyle) -> Self {
        let padding = style.padding as f64;
        let available_w = (style.width as f64 - 2.0 * padding).max(1.0);
        let available_h = (style.height as f64 - 2.0 * padding).max(1.0);

        let span_x = bounds.width();
        let span_y = bounds.height();
        let scale_x = if span_x > 0.0 { available_w / span_x } else { f64::INFINITY };
        let scale_y = if span_y > 0.0 { available_h / span_y } else { f64::INFINITY };
        let mut scale = scale_x.min(scale_y);
        if !scale.is_finite() {
            // a single point
            scale = 1.0;
        }

        Projection {
            min_x: bounds.min().x,
            max_y: bounds.max().y,
            scale,
            offset_x: padding + (available_w - span_x * scale) / 2.0,
            offset_y: padding + (available_h - span_y * scale) / 2.0,
        }
    }

    pub fn project(&self, c: Coord<f64>) -> (f32, f32) {
        let x = self.offset_x + (c.x - self.min_x) * self.scale;
        let y = self.offset_y + (self.max_y - c.y) * self.scale;
        (x as f32, y as f32)
    }
}

// ============================================================================
// Scene
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ScenePath {
    pub name: String,
    pub color: Rgba,
    pub points: Vec<(f32, f32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub width: u32,
    pub height: u32,
    pub background: Rgba,
    pub line_width: f32,
    pub paths: Vec<ScenePath>,
    pub station_color: Rgba,
    pub station_radius: f32,
    pub stations: Vec<(f32, f32)>,
}

fn line_strings(geometry: &Geometry<f64>) -> Vec<&LineString<f64>> {
    match geometry {
        Geometry::LineString(ls) => vec![ls],
        Geometry::MultiLineString(mls) => mls.0.iter().collect(),
        Geometry::Polygon(polygon) => std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .collect(),
        Geometry::GeometryCollection(collection) => {
            collection.0.iter().flat_map(line_strings).collect()
        }
        _ => Vec::new(),
    }
}

fn points(geometry: &Geometry<f64>) -> Vec<Point<f64>> {
    match geometry {
        Geometry::Point(p) => vec![*p],
        Geometry::MultiPoint(mp) => mp.0.clone(),
        Geometry::GeometryCollection(collection) => collection.0.iter().flat_map(points).collect(),
        _ => Vec::new(),
    }
}

impl Scene {
    /// Lines keep data order; stations are drawn after every line.
    pub fn build(
        lines: &FeatureTable,
        stations: Option<&FeatureTable>,
        config: &RenderConfig,
    ) -> Result<(Self, BTreeMap<String, Rgba>)> {
        let style = &config.style;
        style.validate()?;

        let background = Rgba::parse(&style.background)?;
        let station_color = Rgba::parse(&style.station_color)?;
        let fallback = Rgba::parse(&style.default_line_color)?;

        let table = ColorTable::from_config(&config.colors)?;
        let assignments = table.assign(lines, &config.name_attribute, config.missing_color, fallback)?;

        let bounds = merge_bounds(lines.bounding_rect(), stations.and_then(|s| s.bounding_rect()));

        let mut scene = Scene {
            width: style.width,
            height: style.height,
            background,
            line_width: style.line_width,
            paths: Vec::new(),
            station_color,
            station_radius: style.station_radius,
            stations: Vec::new(),
        };

        let Some(bounds) = bounds else {
            debug!("nothing to draw, rendering background only");
            return Ok((scene, assignments));
        };
        let projection = Projection::fit(bounds, style);

        for feature in lines.iter() {
            let Some(geometry) = &feature.geometry else {
                continue;
            };
            let name = feature.attribute(&config.name_attribute).unwrap_or("");
            let color = assignments.get(name).copied().unwrap_or(fallback);

            for line in line_strings(geometry) {
                scene.paths.push(ScenePath {
                    name: name.to_string(),
                    color,
                    points: line.coords().map(|c| projection.project(*c)).collect(),
                });
            }
            for point in points(geometry) {
                scene.paths.push(ScenePath {
                    name: name.to_string(),
                    color,
                    points: vec![projection.project(point.0)],
                });
            }
        }

        if let Some(stations) = stations {
            for geometry in stations.iter().filter_map(|f| f.geometry.as_ref()) {
                scene
                    .stations
                    .extend(points(geometry).into_iter().map(|p| projection.project(p.0)));
            }
        }

        Ok((scene, assignments))
    }

    pub fn rasterize(&self) -> Canvas {
        let mut canvas = Canvas::new(self.width as usize, self.height as usize, self.background);
        let radius = self.line_width / 2.0;

        for path in &self.paths {
            match path.points.as_slice() {
                [] => {}
                [single] => canvas.paint_circle(single.0, single.1, radius, path.color),
                points => {
                    for pair in points.windows(2) {
                        canvas.paint_segment(pair[0], pair[1], radius, path.color);
                    }
                }
            }
        }

        for (x, y) in &self.stations {
            canvas.paint_circle(*x, *y, self.station_radius, self.station_color);
        }
        canvas
    }

    pub fn to_svg(&self) -> String {
        let mut svg = String::new();
        svg.push_str(&format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">\n",
            w = self.width,
            h = self.height
        ));
        svg.push_str(&format!(
            "<rect width=\"100%\" height=\"100%\" fill=\"{}\"/>\n",
            self.background.to_hex()
        ));

        svg.push_str(&format!(
            "<g fill=\"none\" stroke-linecap=\"round\" stroke-linejoin=\"round\" stroke-width=\"{}\">\n",
            self.line_width
        ));
        for path in &self.paths {
            let coords: Vec<String> = path
                .points
                .iter()
                .map(|(x, y)| format!("{:.2},{:.2}", x, y))
                .collect();
            svg.push_str(&format!(
                "<polyline data-name=\"{}\" stroke=\"{}\" points=\"{}\"/>\n",
                escape_xml(&path.name),
                path.color.to_hex(),
                coords.join(" ")
            ));
        }
        svg.push_str("</g>\n");

        svg.push_str(&format!("<g fill=\"{}\">\n", self.station_color.to_hex()));
        for (x, y) in &self.stations {
            svg.push_str(&format!(
                "<circle cx=\"{:.2}\" cy=\"{:.2}\" r=\"{}\"/>\n",
                x, y, self.station_radius
            ));
        }
        svg.push_str("</g>\n</svg>\n");
        svg
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// Raster Canvas
// ============================================================================

pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<[u8; 4]>,
}

impl Canvas {
    pub fn new(width: usize, height: usize, background: Rgba) -> Self {
        Canvas {
            width,
            height,
            pixels: vec![background.0; width * height],
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<Rgba> {
        if x < self.width && y < self.height {
            Some(Rgba(self.pixels[y * self.width + x]))
        } else {
            None
        }
    }

    /// Filled circle, clipped to the canvas.
    pub fn paint_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        if cx + radius < 0.0
            || cy + radius < 0.0
            || cx - radius > self.width as f32
            || cy - radius > self.height as f32
        {
            return;
        }

        let r2 = radius * radius + 0.5; // slight expansion so thin strokes stay visible
        let min_x = (cx - radius).floor().max(0.0) as usize;
        let max_x = ((cx + radius).ceil() as usize).min(self.width - 1);
        let min_y = (cy - radius).floor().max(0.0) as usize;
        let max_y = ((cy + radius).ceil() as usize).min(self.height - 1);

        for py in min_y..=max_y {
            for px in min_x..=max_x {
                let dx = px as f32 - cx;
                let dy = py as f32 - cy;
                if dx * dx + dy * dy <= r2 {
                    self.pixels[py * self.width + px] = color.0;
                }
            }
        }
    }

    /// Thick segment, stamped as overlapping circles.
    pub fn paint_segment(&mut self, from: (f32, f32), to: (f32, f32), radius: f32, color: Rgba) {
        let (dx, dy) = (to.0 - from.0, to.1 - from.1);
        let length = (dx * dx + dy * dy).sqrt();
        let step = (radius * 0.5).max(0.5);
        let steps = (length / step).ceil().max(1.0) as usize;

        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            self.paint_circle(from.0 + dx * t, from.1 + dy * t, radius, color);
        }
    }

    pub fn into_image(self) -> Result<RgbaImage> {
        let (width, height) = (self.width as u32, self.height as u32);
        let raw: Vec<u8> = self.pixels.into_iter().flatten().collect();
        RgbaImage::from_raw(width, height, raw)
            .ok_or_else(|| MapError::RenderError("pixel buffer does not match canvas size".to_string()))
    }
}

// ============================================================================
// Rendered Output
// ============================================================================

pub struct RenderedMap {
    pub scene: Scene,
    pub assignments: BTreeMap<String, Rgba>,
}

impl RenderedMap {
    pub fn line_count(&self) -> usize {
        self.scene.paths.len()
    }

    pub fn station_count(&self) -> usize {
        self.scene.stations.len()
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let image = self.scene.rasterize().into_image()?;
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| MapError::RenderError(format!("Failed to encode PNG: {}", e)))?;
        Ok(buffer.into_inner())
    }

    pub fn to_svg(&self) -> String {
        self.scene.to_svg()
    }

    /// Writes PNG or SVG depending on the extension of `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let contents = match extension.as_str() {
            "png" => self.to_png()?,
            "svg" => self.to_svg().into_bytes(),
            other => {
                return Err(MapError::RenderError(format!(
                    "unsupported output format '{}' (use .png or .svg)",
                    other
                )));
            }
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| MapError::FileError(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        fs::write(path, contents)
            .map_err(|e| MapError::FileError(format!("Failed to write {}: {}", path.display(), e)))
    }
}

pub fn render_map(
    lines: &FeatureTable,
    stations: Option<&FeatureTable>,
    config: &RenderConfig,
) -> Result<RenderedMap> {
    let (scene, assignments) = Scene::build(lines, stations, config)?;
    debug!(
        "scene: {} paths, {} stations, {} colors",
        scene.paths.len(),
        scene.stations.len(),
        assignments.len()
    );
    Ok(RenderedMap { scene, assignments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, FeatureKind};
    use geo::{MultiLineString, coord};

    fn config(colors: &[(&str, &str)]) -> RenderConfig {
        RenderConfig {
            subset: "core".to_string(),
            name_attribute: "NAME".to_string(),
            colors: colors
                .iter()
                .map(|(n, c)| (n.to_string(), c.to_string()))
                .collect(),
            missing_color: MissingColorPolicy::Default,
            style: RenderStyle {
                width: 100,
                height: 100,
                padding: 10,
                ..RenderStyle::default()
            },
        }
    }

    fn lines(features: Vec<(&str, Vec<(f64, f64)>)>) -> FeatureTable {
        FeatureTable::with_features(
            FeatureKind::Lines,
            vec!["NAME".to_string()],
            features
                .into_iter()
                .map(|(name, coords)| {
                    Feature::new(Some(Geometry::MultiLineString(MultiLineString::new(vec![
                        LineString::from(coords),
                    ]))))
                    .with_attribute("NAME", name)
                })
                .collect(),
        )
    }

    #[test]
    fn parse_colors() {
        assert_eq!(Rgba::parse("#F8C300").unwrap(), Rgba::rgb(0xF8, 0xC3, 0x00));
        assert_eq!(Rgba::parse("808080").unwrap(), Rgba::rgb(128, 128, 128));
        assert_eq!(Rgba::parse("#00000080").unwrap(), Rgba([0, 0, 0, 0x80]));
        assert_eq!(Rgba::parse(" White ").unwrap(), Rgba::rgb(255, 255, 255));
        assert!(matches!(Rgba::parse("#12345"), Err(MapError::ConfigError(_))));
        assert!(matches!(Rgba::parse("chartreuse-ish"), Err(MapError::ConfigError(_))));
        assert_eq!(Rgba::rgb(0xF8, 0xC3, 0).to_hex(), "#f8c300");
    }

    #[test]
    fn missing_color_falls_back_by_default() {
        let table = ColorTable::from_config(
            &[("Line 1".to_string(), "yellow".to_string())].into_iter().collect(),
        )
        .unwrap();
        let lines = lines(vec![("Line 1", vec![(0.0, 0.0), (1.0, 1.0)]), ("Mystery", vec![(1.0, 1.0), (2.0, 0.0)])]);
        let fallback = Rgba::rgb(128, 128, 128);

        let assigned = table
            .assign(&lines, "NAME", MissingColorPolicy::Default, fallback)
            .unwrap();
        assert_eq!(assigned["Line 1"], Rgba::rgb(255, 255, 0));
        assert_eq!(assigned["Mystery"], fallback);

        match table.assign(&lines, "NAME", MissingColorPolicy::Fail, fallback) {
            Err(MapError::MissingColorMapping(msg)) => assert!(msg.contains("Mystery")),
            other => panic!("expected MissingColorMapping, got {:?}", other),
        }
    }

    #[test]
    fn projection_keeps_aspect_and_flips_y() {
        let style = RenderStyle {
            width: 200,
            height: 100,
            padding: 0,
            ..RenderStyle::default()
        };
        let bounds = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });
        let projection = Projection::fit(bounds, &style);

        // square data on a wide canvas: scale 10, centered horizontally
        assert_eq!(projection.project(coord! { x: 0.0, y: 10.0 }), (50.0, 0.0));
        assert_eq!(projection.project(coord! { x: 10.0, y: 0.0 }), (150.0, 100.0));
    }

    #[test]
    fn single_point_is_centered() {
        let style = RenderStyle {
            width: 100,
            height: 100,
            padding: 10,
            ..RenderStyle::default()
        };
        let bounds = Rect::new(coord! { x: 5.0, y: 5.0 }, coord! { x: 5.0, y: 5.0 });
        let projection = Projection::fit(bounds, &style);
        assert_eq!(projection.project(coord! { x: 5.0, y: 5.0 }), (50.0, 50.0));
    }

    #[test]
    fn raster_draws_lines_in_assigned_color_and_stations_on_top() {
        let lines = lines(vec![("Line 1", vec![(0.0, 0.0), (10.0, 0.0)])]);
        let stations = FeatureTable::with_features(
            FeatureKind::Stations,
            vec!["NAME".to_string()],
            vec![Feature::new(Some(Geometry::Point(Point::new(10.0, 0.0)))).with_attribute("NAME", "Line 1")],
        );
        let config = config(&[("Line 1", "#ff0000")]);

        let map = render_map(&lines, Some(&stations), &config).unwrap();
        let canvas = map.scene.rasterize();

        // horizontal line through the vertical center
        assert_eq!(canvas.pixel(30, 50), Some(Rgba::rgb(255, 0, 0)));
        // station at the right end, drawn over the line
        assert_eq!(canvas.pixel(90, 50), Some(Rgba::rgb(255, 255, 255)));
        // background stays dark
        assert_eq!(canvas.pixel(50, 5), Some(Rgba::rgb(0x11, 0x11, 0x11)));
    }

    #[test]
    fn empty_subset_renders_background_only() {
        let lines = FeatureTable::new(FeatureKind::Lines, vec!["NAME".to_string()]);
        let map = render_map(&lines, None, &config(&[])).unwrap();
        assert_eq!(map.line_count(), 0);
        assert!(map.assignments.is_empty());
        let canvas = map.scene.rasterize();
        assert_eq!(canvas.pixel(0, 0), Some(Rgba::rgb(0x11, 0x11, 0x11)));
    }

    #[test]
    fn svg_contains_paths_and_no_chrome() {
        let lines = lines(vec![("A & B", vec![(0.0, 0.0), (1.0, 1.0)])]);
        let map = render_map(&lines, None, &config(&[("A & B", "blue")])).unwrap();
        let svg = map.to_svg();
        assert!(svg.contains("stroke=\"#0000ff\""));
        assert!(svg.contains("data-name=\"A &amp; B\""));
        assert!(!svg.contains("<text"));
    }

    #[test]
    fn png_encoding_and_save() {
        let lines = lines(vec![("Line 1", vec![(0.0, 0.0), (1.0, 1.0)])]);
        let map = render_map(&lines, None, &config(&[])).unwrap();

        let png = map.to_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let dir = tempfile::tempdir().unwrap();
        map.save(&dir.path().join("out/map.svg")).unwrap();
        assert!(dir.path().join("out/map.svg").exists());
        assert!(matches!(
            map.save(&dir.path().join("map.gif")),
            Err(MapError::RenderError(_))
        ));
    }

    #[test]
    fn painting_off_canvas_is_clipped() {
        let mut canvas = Canvas::new(10, 10, Rgba::rgb(0, 0, 0));
        canvas.paint_circle(-50.0, -50.0, 3.0, Rgba::rgb(255, 0, 0));
        canvas.paint_segment((-5.0, 5.0), (15.0, 5.0), 1.0, Rgba::rgb(0, 255, 0));
        assert_eq!(canvas.pixel(0, 0), Some(Rgba::rgb(0, 0, 0)));
        assert_eq!(canvas.pixel(5, 5), Some(Rgba::rgb(0, 255, 0)));
        assert_eq!(canvas.pixel(10, 5), None);
    }

    #[test]
    fn style_validation() {
        assert!(RenderStyle::default().validate().is_ok());
        let cramped = RenderStyle {
            width: 50,
            height: 50,
            padding: 25,
            ..RenderStyle::default()
        };
        assert!(matches!(cramped.validate(), Err(MapError::ConfigError(_))));
        let bad_color = RenderStyle {
            background: "nope".to_string(),
            ..RenderStyle::default()
        };
        assert!(bad_color.validate().is_err());

        let huge = RenderStyle {
            width: 100_000,
            height: 100_000,
            ..RenderStyle::default()
        };
        assert!(matches!(huge.validate(), Err(MapError::ConfigError(_))));
        let widest = RenderStyle {
            width: MAX_CANVAS_SIZE,
            height: 64,
            padding: 8,
            ..RenderStyle::default()
        };
        assert!(widest.validate().is_ok());
    }
}
