// Run summaries and CSV export of filtered subsets.

use crate::models::{FeatureTable, MapError, Result};
use crate::pipeline::Subset;
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Local time of the network the default rules describe.
pub const NETWORK_TIMEZONE: Tz = chrono_tz::America::Toronto;

const TECHNOLOGY_ATTRIBUTE: &str = "TECHNOLOGY";

pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

pub fn format_timestamp_full(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(dt) => dt
            .with_timezone(&NETWORK_TIMEZONE)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string(),
        None => format!("Invalid timestamp: {}", timestamp),
    }
}

pub fn count_by(table: &FeatureTable, attribute: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    if !table.has_column(attribute) {
        return counts;
    }
    for feature in table.iter() {
        let value = feature.attribute(attribute).unwrap_or("").to_string();
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

pub fn summarize(subsets: &[Subset], generated_at: i64) -> String {
    let mut out = String::from("📊 Subset Statistics:\n");

    for subset in subsets {
        out.push_str(&format!(
            "• {}: {} lines, {} distinct names",
            subset.name,
            subset.lines.len(),
            subset.line_names.len()
        ));
        if let Some(stations) = &subset.stations {
            out.push_str(&format!(", {} stations", stations.len()));
        }
        out.push('\n');

        if !subset.description.is_empty() {
            out.push_str(&format!("    {}\n", subset.description));
        }

        let technologies = count_by(&subset.lines, TECHNOLOGY_ATTRIBUTE);
        if !technologies.is_empty() {
            let parts: Vec<String> = technologies
                .iter()
                .map(|(technology, count)| format!("{} × {}", count, technology))
                .collect();
            out.push_str(&format!("    {}\n", parts.join(" | ")));
        }

        if let Some(join) = subset.join.as_ref().filter(|j| !j.is_clean()) {
            out.push_str(&format!(
                "    ⚠️  {} line names without stations, {} unused supplemental names\n",
                join.unmatched_lines.len(),
                join.unused_supplemental.len()
            ));
        }
    }

    out.push_str(&format!("• Generated: {}", format_timestamp_full(generated_at)));
    out
}

fn write_table_csv(table: &FeatureTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| MapError::FileError(format!("Failed to create {}: {}", path.display(), e)))?;

    let mut header: Vec<&str> = table.columns.iter().map(String::as_str).collect();
    header.push("geometry");
    header.push("vertices");
    writer
        .write_record(&header)
        .map_err(|e| MapError::FileError(format!("Failed to write {}: {}", path.display(), e)))?;

    for feature in table.iter() {
        let mut row: Vec<String> = table
            .columns
            .iter()
            .map(|column| feature.attribute(column).unwrap_or("").to_string())
            .collect();
        row.push(feature.geometry_type().to_string());
        row.push(feature.vertex_count().to_string());
        writer
            .write_record(&row)
            .map_err(|e| MapError::FileError(format!("Failed to write {}: {}", path.display(), e)))?;
    }

    writer
        .flush()
        .map_err(|e| MapError::FileError(format!("Failed to flush {}: {}", path.display(), e)))
}

/// Writes `<subset>_lines.csv` and, when the subset has stations, `<subset>_stations.csv`.
pub fn export_csv(subset: &Subset, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .map_err(|e| MapError::FileError(format!("Failed to create {}: {}", dir.display(), e)))?;

    let mut written = Vec::new();

    let lines_path = dir.join(format!("{}_lines.csv", subset.name));
    write_table_csv(&subset.lines, &lines_path)?;
    written.push(lines_path);

    if let Some(stations) = &subset.stations {
        let stations_path = dir.join(format!("{}_stations.csv", subset.name));
        write_table_csv(stations, &stations_path)?;
        written.push(stations_path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, FeatureKind};
    use crate::pipeline::JoinReport;
    use geo::{Geometry, Point};

    fn subset() -> Subset {
        let lines = FeatureTable::with_features(
            FeatureKind::Lines,
            vec!["NAME".into(), "TECHNOLOGY".into()],
            vec![
                Feature::new(None)
                    .with_attribute("NAME", "Line 1, \"Yonge\"")
                    .with_attribute("TECHNOLOGY", "Subway"),
                Feature::new(None)
                    .with_attribute("NAME", "Line 5")
                    .with_attribute("TECHNOLOGY", "LRT / BRT"),
                Feature::new(None)
                    .with_attribute("NAME", "Line 2")
                    .with_attribute("TECHNOLOGY", "Subway"),
            ],
        );
        let stations = FeatureTable::with_features(
            FeatureKind::Stations,
            vec!["NAME".into()],
            vec![Feature::new(Some(Geometry::Point(Point::new(1.0, 2.0)))).with_attribute("NAME", "Line 5")],
        );
        Subset {
            name: "core".into(),
            description: "Existing and committed rapid transit".into(),
            line_names: ["Line 1, \"Yonge\"", "Line 2", "Line 5"].iter().map(|s| s.to_string()).collect(),
            lines,
            stations: Some(stations),
            join: Some(JoinReport {
                unmatched_lines: vec!["Line 2".into()],
                unused_supplemental: vec![],
            }),
        }
    }

    #[test]
    fn timestamps_use_network_time() {
        // 2024-07-01 16:00:00 UTC is noon in Toronto (EDT)
        assert_eq!(format_timestamp_full(1_719_849_600), "2024-07-01 12:00:00 EDT");
    }

    #[test]
    fn count_by_technology() {
        let counts = count_by(&subset().lines, "TECHNOLOGY");
        assert_eq!(counts["Subway"], 2);
        assert_eq!(counts["LRT / BRT"], 1);
        assert!(count_by(&subset().lines, "STATUS").is_empty());
    }

    #[test]
    fn summary_mentions_counts_and_join_warnings() {
        let text = summarize(&[subset()], 1_719_849_600);
        assert!(text.contains("core: 3 lines, 3 distinct names, 1 stations"));
        assert!(text.contains("2 × Subway"));
        assert!(text.contains("1 line names without stations"));
    }

    #[test]
    fn csv_export_writes_lines_and_stations() {
        let dir = tempfile::tempdir().unwrap();
        let written = export_csv(&subset(), dir.path()).unwrap();
        assert_eq!(written.len(), 2);

        let mut reader = csv::Reader::from_path(&written[0]).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, vec!["NAME", "TECHNOLOGY", "geometry", "vertices"]);
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(first.get(0), Some("Line 1, \"Yonge\""));
        assert_eq!(first.get(2), Some("Null"));

        let mut reader = csv::Reader::from_path(&written[1]).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.get(1), Some("Point"));
        assert_eq!(row.get(2), Some("1"));
    }
}
