// Shapefile loading for the line and station layers.
//
// A source is either the path of a primary `.shp` file (the `.shx` and `.dbf`
// siblings are located next to it), a `.zip` bundle holding the shapefile set,
// or an http(s) URL to such a bundle. Remote bundles are cached on disk and
// reused until they expire.

use crate::models::{Feature, FeatureKind, FeatureTable, MapError, Result};
use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, Point};
use log::{debug, info, warn};
use reqwest::blocking;
use serde::{Deserialize, Serialize};
use shapefile::dbase::{self, FieldValue};
use shapefile::{Shape, ShapeReader};
use std::fs;
use std::io::{Cursor, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::ZipArchive;

const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CACHE_MAX_AGE_DAYS: u64 = 30;

// ============================================================================
// Sources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    Shapefile(PathBuf),
    Archive { path: PathBuf, member: Option<String> },
    Remote { url: String, member: Option<String> },
}

impl DatasetSource {
    /// `lines.shp`, `bundle.zip`, `bundle.zip#stations`, `https://host/bundle.zip#lines`
    pub fn parse(raw: &str) -> Self {
        let (location, member) = match raw.rsplit_once('#') {
            Some((location, member)) if !member.is_empty() && (is_url(location) || is_zip(location)) => {
                (location, Some(member.to_string()))
            }
            _ => (raw, None),
        };

        if is_url(location) {
            DatasetSource::Remote {
                url: location.to_string(),
                member,
            }
        } else if is_zip(location) {
            DatasetSource::Archive {
                path: PathBuf::from(location),
                member,
            }
        } else {
            DatasetSource::Shapefile(PathBuf::from(raw))
        }
    }

    /// Value parser for command line arguments.
    pub fn from_arg(raw: &str) -> std::result::Result<Self, String> {
        if raw.trim().is_empty() {
            return Err("dataset source must not be empty".to_string());
        }
        Ok(Self::parse(raw))
    }

    pub fn describe(&self) -> String {
        match self {
            DatasetSource::Shapefile(path) => path.display().to_string(),
            DatasetSource::Archive { path, member: Some(m) } => format!("{}#{}", path.display(), m),
            DatasetSource::Archive { path, member: None } => path.display().to_string(),
            DatasetSource::Remote { url, member: Some(m) } => format!("{}#{}", url, m),
            DatasetSource::Remote { url, member: None } => url.clone(),
        }
    }
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn is_zip(location: &str) -> bool {
    location.to_ascii_lowercase().ends_with(".zip")
}

/// Raw contents of one shapefile set, wherever it came from.
struct ShapefileParts {
    label: String,
    shp: Vec<u8>,
    dbf: Vec<u8>,
    prj: Option<String>,
}

// ============================================================================
// Download Cache
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDownload {
    pub url: String,
    pub file_name: String,
    pub size: u64,
    pub cached_at: u64,
}

impl CachedDownload {
    pub fn is_expired(&self, max_age_days: u64) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let age_days = (now.saturating_sub(self.cached_at)) / 86400;
        age_days >= max_age_days
    }

    pub fn cache_dir() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("transit_map");
        fs::create_dir_all(&path).ok();
        path
    }

    /// File-system safe key for a URL.
    pub fn key(url: &str) -> String {
        let key: String = url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        key.chars().take(120).collect()
    }

    fn sidecar_path(url: &str) -> PathBuf {
        Self::cache_dir().join(format!("{}.json", Self::key(url)))
    }

    pub fn load(url: &str, max_age_days: u64) -> Option<(Self, bytes::Bytes)> {
        let sidecar = Self::sidecar_path(url);

        if !sidecar.exists() {
            info!("ℹ️  No cached copy of {}, will download", url);
            return None;
        }

        let entry = match fs::read_to_string(&sidecar)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<CachedDownload>(&s).map_err(|e| e.to_string()))
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!("⚠️  Failed to read cache entry for {} ({}), will refresh", url, e);
                return None;
            }
        };

        if entry.url != url {
            debug!("cache key collision for {} (entry holds {})", url, entry.url);
            return None;
        }

        if entry.is_expired(max_age_days) {
            info!("⚠️  Cached copy of {} expired (>{} days old), refreshing...", url, max_age_days);
            return None;
        }

        match fs::read(Self::cache_dir().join(&entry.file_name)) {
            Ok(data) => {
                info!("✓ Using cached copy of {} ({} KB)", url, data.len() / 1024);
                Some((entry, bytes::Bytes::from(data)))
            }
            Err(e) => {
                warn!("⚠️  Cached archive for {} unreadable ({}), will refresh", url, e);
                None
            }
        }
    }

    pub fn save(url: &str, data: &[u8]) -> Result<Self> {
        let key = Self::key(url);
        let entry = CachedDownload {
            url: url.to_string(),
            file_name: format!("{}.zip", key),
            size: data.len() as u64,
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        let dir = Self::cache_dir();
        fs::write(dir.join(&entry.file_name), data)
            .map_err(|e| MapError::FileError(format!("Failed to write cached archive: {}", e)))?;

        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| MapError::FileError(format!("Failed to serialize cache entry: {}", e)))?;
        fs::write(Self::sidecar_path(url), json)
            .map_err(|e| MapError::FileError(format!("Failed to write cache entry: {}", e)))?;

        debug!("cached {} as {:?}", url, dir.join(&entry.file_name));
        Ok(entry)
    }
}

// ============================================================================
// Loading
// ============================================================================

pub fn load_table(source: &DatasetSource, kind: FeatureKind) -> Result<FeatureTable> {
    load_table_with_cache_age(source, kind, DEFAULT_CACHE_MAX_AGE_DAYS)
}

pub fn load_table_with_cache_age(
    source: &DatasetSource,
    kind: FeatureKind,
    cache_max_age_days: u64,
) -> Result<FeatureTable> {
    let parts = match source {
        DatasetSource::Shapefile(path) => read_from_disk(path)?,
        DatasetSource::Archive { path, member } => {
            let data = fs::read(path).map_err(|e| io_error(path, e))?;
            read_from_archive(bytes::Bytes::from(data), member.as_deref(), &source.describe())?
        }
        DatasetSource::Remote { url, member } => {
            let data = fetch_remote(url, cache_max_age_days)?;
            read_from_archive(data, member.as_deref(), &source.describe())?
        }
    };

    let table = decode_table(parts, kind)?;
    info!(
        "✓ Loaded {} {} features ({} columns) from {}",
        table.len(),
        kind.label(),
        table.columns.len(),
        source.describe()
    );
    Ok(table)
}

fn io_error(path: &Path, e: std::io::Error) -> MapError {
    if e.kind() == ErrorKind::NotFound {
        MapError::FileNotFound(path.display().to_string())
    } else {
        MapError::FileError(format!("Failed to read {}: {}", path.display(), e))
    }
}

/// Sibling of `path` with the given extension, trying lower then upper case.
fn find_sibling(path: &Path, extension: &str) -> Option<PathBuf> {
    [extension.to_ascii_lowercase(), extension.to_ascii_uppercase()]
        .iter()
        .map(|ext| path.with_extension(ext))
        .find(|candidate| candidate.exists())
}

fn read_from_disk(path: &Path) -> Result<ShapefileParts> {
    if !path.exists() {
        return Err(MapError::FileNotFound(path.display().to_string()));
    }

    let mut required = Vec::new();
    for extension in ["shx", "dbf"] {
        match find_sibling(path, extension) {
            Some(sibling) => required.push(sibling),
            None => {
                return Err(MapError::FileNotFound(format!(
                    "missing sibling .{} for {}",
                    extension,
                    path.display()
                )));
            }
        }
    }

    let shp = fs::read(path).map_err(|e| io_error(path, e))?;
    let dbf = fs::read(&required[1]).map_err(|e| io_error(&required[1], e))?;
    let prj = find_sibling(path, "prj").and_then(|p| fs::read_to_string(p).ok());

    Ok(ShapefileParts {
        label: path.display().to_string(),
        shp,
        dbf,
        prj,
    })
}

fn read_from_archive(data: bytes::Bytes, member: Option<&str>, label: &str) -> Result<ShapefileParts> {
    let cursor = Cursor::new(data);
    let mut archive = ZipArchive::new(cursor)
        .map_err(|e| MapError::ParseError(format!("Failed to open {}: {}", label, e)))?;

    let names: Vec<String> = archive.file_names().map(String::from).collect();
    let shapefiles: Vec<&String> = names
        .iter()
        .filter(|n| n.to_ascii_lowercase().ends_with(".shp"))
        .collect();

    let chosen = match member {
        Some(wanted) => {
            let wanted = strip_shp_suffix(wanted);
            let matching: Vec<&String> = shapefiles
                .iter()
                .copied()
                .filter(|n| archive_stem(n) == wanted || strip_extension(n) == wanted)
                .collect();
            match matching.as_slice() {
                [single] => (*single).clone(),
                [] => {
                    return Err(MapError::FileNotFound(format!(
                        "no shapefile named '{}' in {}",
                        wanted, label
                    )));
                }
                _ => {
                    return Err(MapError::ParseError(format!(
                        "'{}' matches several shapefiles in {}",
                        wanted, label
                    )));
                }
            }
        }
        None => match shapefiles.as_slice() {
            [single] => (*single).clone(),
            [] => {
                return Err(MapError::ParseError(format!("{} holds no .shp file", label)));
            }
            several => {
                let stems: Vec<&str> = several.iter().map(|n| archive_stem(n)).collect();
                return Err(MapError::ParseError(format!(
                    "{} holds several shapefiles ({}); select one with '#<name>'",
                    label,
                    stems.join(", ")
                )));
            }
        },
    };

    let base = strip_extension(&chosen).to_string();
    let find_member = |extension: &str| -> Option<String> {
        names
            .iter()
            .find(|n| {
                strip_extension(n) == base
                    && n.to_ascii_lowercase().ends_with(&format!(".{}", extension))
            })
            .cloned()
    };

    let dbf_name = find_member("dbf").ok_or_else(|| {
        MapError::FileNotFound(format!("missing sibling .dbf for {} in {}", chosen, label))
    })?;
    if find_member("shx").is_none() {
        return Err(MapError::FileNotFound(format!(
            "missing sibling .shx for {} in {}",
            chosen, label
        )));
    }
    let prj_name = find_member("prj");

    let shp = read_archive_member(&mut archive, &chosen, label)?;
    let dbf = read_archive_member(&mut archive, &dbf_name, label)?;
    let prj = match prj_name {
        Some(name) => read_archive_member(&mut archive, &name, label)
            .ok()
            .map(|data| String::from_utf8_lossy(&data).into_owned()),
        None => None,
    };

    Ok(ShapefileParts {
        label: format!("{} ({})", label, chosen),
        shp,
        dbf,
        prj,
    })
}

fn read_archive_member(
    archive: &mut ZipArchive<Cursor<bytes::Bytes>>,
    name: &str,
    label: &str,
) -> Result<Vec<u8>> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| MapError::FileNotFound(format!("{} not found in {}: {}", name, label, e)))?;

    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .map_err(|e| MapError::FileError(format!("Failed to read {} from {}: {}", name, label, e)))?;
    Ok(contents)
}

fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// `stations.shp` selects the same member as `stations`.
fn strip_shp_suffix(name: &str) -> &str {
    match name.len().checked_sub(4).and_then(|idx| name.get(idx..).map(|ext| (idx, ext))) {
        Some((idx, ext)) if ext.eq_ignore_ascii_case(".shp") => &name[..idx],
        _ => name,
    }
}

fn archive_stem(name: &str) -> &str {
    let without_dir = name.rsplit('/').next().unwrap_or(name);
    strip_extension(without_dir)
}

fn fetch_remote(url: &str, max_age_days: u64) -> Result<bytes::Bytes> {
    if let Some((_, data)) = CachedDownload::load(url, max_age_days) {
        return Ok(data);
    }

    println!("📥 Downloading {}...", url);

    let client = blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| MapError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| MapError::NetworkError(format!("Failed to download {}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(MapError::NetworkError(format!(
            "Download of {} failed with status: {}",
            url,
            response.status()
        )));
    }

    let data = response
        .bytes()
        .map_err(|e| MapError::NetworkError(format!("Failed to read {}: {}", url, e)))?;

    println!("✓ Downloaded {} KB", data.len() / 1024);

    if let Err(e) = CachedDownload::save(url, &data) {
        eprintln!("⚠️  Warning: Could not cache {}: {}", url, e);
    }

    Ok(data)
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_table(parts: ShapefileParts, kind: FeatureKind) -> Result<FeatureTable> {
    let ShapefileParts { label, shp, dbf, prj } = parts;

    let shape_reader = ShapeReader::new(Cursor::new(shp))
        .map_err(|e| MapError::ParseError(format!("{}: invalid .shp file: {}", label, e)))?;
    let dbase_reader = dbase::Reader::new(Cursor::new(dbf))
        .map_err(|e| MapError::ParseError(format!("{}: invalid .dbf table: {}", label, e)))?;

    let columns: Vec<String> = dbase_reader
        .fields()
        .iter()
        .map(|field| field.name().to_string())
        .filter(|name| name != "DeletionFlag")
        .collect();

    let mut reader = shapefile::Reader::new(shape_reader, dbase_reader);
    let mut features = Vec::new();

    for (index, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result
            .map_err(|e| MapError::ParseError(format!("{}: record {}: {}", label, index, e)))?;

        let attributes = columns
            .iter()
            .map(|column| {
                let value = record.get(column).map(field_to_string).unwrap_or_default();
                (column.clone(), value)
            })
            .collect();

        features.push(Feature {
            geometry: shape_to_geometry(shape),
            attributes,
        });
    }

    Ok(FeatureTable {
        kind,
        columns,
        features,
        projection: prj,
    })
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub(crate) fn field_to_string(value: &FieldValue) -> String {
    match value {
        FieldValue::Character(Some(s)) => s.trim().to_string(),
        FieldValue::Character(None) => String::new(),
        FieldValue::Memo(s) => s.trim().to_string(),
        FieldValue::Numeric(Some(n)) => format_number(*n),
        FieldValue::Numeric(None) => String::new(),
        FieldValue::Float(Some(f)) => format_number(*f as f64),
        FieldValue::Float(None) => String::new(),
        FieldValue::Double(d) => format_number(*d),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Logical(Some(b)) => b.to_string(),
        FieldValue::Logical(None) => String::new(),
        other => format!("{:?}", other),
    }
}

fn multi_line<'a, P: 'a>(
    parts: impl Iterator<Item = &'a [P]>,
    xy: impl Fn(&P) -> Coord<f64>,
) -> Geometry<f64> {
    let lines = parts
        .map(|part| LineString::new(part.iter().map(&xy).collect()))
        .collect();
    Geometry::MultiLineString(MultiLineString::new(lines))
}

fn multi_point<P>(points: &[P], xy: impl Fn(&P) -> Coord<f64>) -> Geometry<f64> {
    Geometry::MultiPoint(MultiPoint::new(
        points.iter().map(|p| Point::from(xy(p))).collect(),
    ))
}

/// Polylines become `MultiLineString`s, polygon rings are kept as outlines,
/// Z and M values are dropped.
pub(crate) fn shape_to_geometry(shape: Shape) -> Option<Geometry<f64>> {
    match shape {
        Shape::NullShape => None,
        Shape::Point(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::PointM(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::PointZ(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::Polyline(line) => Some(multi_line(
            line.parts().iter().map(|part| part.as_slice()),
            |p| Coord { x: p.x, y: p.y },
        )),
        Shape::PolylineM(line) => Some(multi_line(
            line.parts().iter().map(|part| part.as_slice()),
            |p| Coord { x: p.x, y: p.y },
        )),
        Shape::PolylineZ(line) => Some(multi_line(
            line.parts().iter().map(|part| part.as_slice()),
            |p| Coord { x: p.x, y: p.y },
        )),
        Shape::Polygon(polygon) => Some(multi_line(
            polygon.rings().iter().map(|ring| ring.points()),
            |p| Coord { x: p.x, y: p.y },
        )),
        Shape::PolygonM(polygon) => Some(multi_line(
            polygon.rings().iter().map(|ring| ring.points()),
            |p| Coord { x: p.x, y: p.y },
        )),
        Shape::PolygonZ(polygon) => Some(multi_line(
            polygon.rings().iter().map(|ring| ring.points()),
            |p| Coord { x: p.x, y: p.y },
        )),
        Shape::Multipoint(points) => Some(multi_point(points.points(), |p| Coord { x: p.x, y: p.y })),
        Shape::MultipointM(points) => Some(multi_point(points.points(), |p| Coord { x: p.x, y: p.y })),
        Shape::MultipointZ(points) => Some(multi_point(points.points(), |p| Coord { x: p.x, y: p.y })),
        Shape::Multipatch(_) => {
            debug!("skipping multipatch geometry");
            None
        }
    }
}
