// Subset evaluation: predicate filtering over the lines table and the
// name-membership join that derives each subset's stations.

use crate::models::{FeatureTable, MapError, Result};
use crate::rules::{DEFAULT_NAME_ATTRIBUTE, MapConfig, Predicate, StationJoin};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;

// ============================================================================
// Data Structures
// ============================================================================

/// Names that failed to line up between the two datasets. Reported, never enforced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinReport {
    /// Line names no station carries.
    pub unmatched_lines: Vec<String>,
    /// Supplemental names no station carries.
    pub unused_supplemental: Vec<String>,
}

impl JoinReport {
    pub fn is_clean(&self) -> bool {
        self.unmatched_lines.is_empty() && self.unused_supplemental.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Subset {
    pub name: String,
    pub description: String,
    pub lines: FeatureTable,
    pub line_names: BTreeSet<String>,
    pub stations: Option<FeatureTable>,
    pub join: Option<JoinReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubsetSummary {
    pub name: String,
    pub description: String,
    pub lines: usize,
    pub distinct_names: usize,
    pub stations: Option<usize>,
    pub join: Option<JoinReport>,
}

impl Subset {
    pub fn summary(&self) -> SubsetSummary {
        SubsetSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            lines: self.lines.len(),
            distinct_names: self.line_names.len(),
            stations: self.stations.as_ref().map(|s| s.len()),
            join: self.join.clone(),
        }
    }
}

pub fn find_subset<'a>(subsets: &'a [Subset], name: &str) -> Option<&'a Subset> {
    subsets.iter().find(|s| s.name == name)
}

// ============================================================================
// Operations
// ============================================================================

/// Rows satisfying `predicate`, in their original order.
pub fn filter_table(table: &FeatureTable, predicate: &Predicate) -> Result<FeatureTable> {
    for attribute in predicate.attributes() {
        table.require_column(attribute)?;
    }

    let features = table
        .iter()
        .filter(|feature| predicate.evaluate(feature))
        .cloned()
        .collect();
    Ok(table.derive(features))
}

/// Applies each step in turn; every step narrows the previous result.
pub fn apply_steps(table: &FeatureTable, steps: &[Predicate]) -> Result<FeatureTable> {
    let mut current = table.clone();
    for step in steps {
        current = filter_table(&current, step)?;
    }
    Ok(current)
}

pub fn distinct_values(table: &FeatureTable, attribute: &str) -> Result<BTreeSet<String>> {
    table.require_column(attribute)?;
    Ok(table
        .iter()
        .filter_map(|feature| feature.attribute(attribute))
        .map(String::from)
        .collect())
}

/// Stations whose join attribute is one of `line_names` or a supplemental name.
pub fn join_stations(
    stations: &FeatureTable,
    line_names: &BTreeSet<String>,
    join: &StationJoin,
) -> Result<(FeatureTable, JoinReport)> {
    stations.require_column(&join.station_attribute)?;

    let wanted: BTreeSet<&str> = line_names
        .iter()
        .map(String::as_str)
        .chain(join.supplemental.iter().map(String::as_str))
        .collect();

    let features: Vec<_> = stations
        .iter()
        .filter(|feature| {
            feature
                .attribute(&join.station_attribute)
                .is_some_and(|name| wanted.contains(name))
        })
        .cloned()
        .collect();

    let matched: BTreeSet<&str> = features
        .iter()
        .filter_map(|feature| feature.attribute(&join.station_attribute))
        .collect();

    let report = JoinReport {
        unmatched_lines: line_names
            .iter()
            .filter(|name| !matched.contains(name.as_str()))
            .cloned()
            .collect(),
        unused_supplemental: join
            .supplemental
            .iter()
            .filter(|name| !matched.contains(name.as_str()))
            .cloned()
            .collect(),
    };

    Ok((stations.derive(features), report))
}

/// Evaluates every subset rule of `config`, in order.
pub fn run_pipeline(
    config: &MapConfig,
    lines: &FeatureTable,
    stations: &FeatureTable,
) -> Result<Vec<Subset>> {
    config.validate()?;

    let mut subsets: Vec<Subset> = Vec::with_capacity(config.subsets.len());

    for rule in &config.subsets {
        let base = match &rule.source {
            Some(source) => {
                &find_subset(&subsets, source)
                    .ok_or_else(|| {
                        MapError::ConfigError(format!(
                            "subset '{}' narrows unknown subset '{}'",
                            rule.name, source
                        ))
                    })?
                    .lines
            }
            None => lines,
        };

        let filtered = apply_steps(base, &rule.steps)?;

        let name_attribute = rule
            .stations
            .as_ref()
            .map(|join| join.line_attribute.as_str())
            .unwrap_or(DEFAULT_NAME_ATTRIBUTE);
        let line_names = if rule.stations.is_some() || filtered.has_column(name_attribute) {
            distinct_values(&filtered, name_attribute)?
        } else {
            BTreeSet::new()
        };

        let (joined, join) = match &rule.stations {
            Some(join) => {
                let (table, report) = join_stations(stations, &line_names, join)?;
                (Some(table), Some(report))
            }
            None => (None, None),
        };

        info!(
            "🔎 Subset '{}': {} of {} lines kept ({} names){}",
            rule.name,
            filtered.len(),
            base.len(),
            line_names.len(),
            joined
                .as_ref()
                .map(|s| format!(", {} stations", s.len()))
                .unwrap_or_default()
        );
        if let Some(report) = &join {
            for name in &report.unmatched_lines {
                warn!("⚠️  Subset '{}': no station named '{}'", rule.name, name);
            }
            for name in &report.unused_supplemental {
                warn!(
                    "⚠️  Subset '{}': supplemental station name '{}' matched nothing",
                    rule.name, name
                );
            }
        }

        subsets.push(Subset {
            name: rule.name.clone(),
            description: rule.description.clone(),
            lines: filtered,
            line_names,
            stations: joined,
            join,
        });
    }

    Ok(subsets)
}
