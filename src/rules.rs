// Declarative filter rules.
//
// Which lines make it onto the map is described as data: an ordered list of
// subset rules, each a chain of predicates over the lines table plus an
// optional station join. The network-specific rules ship embedded as JSON and
// can be replaced by a user config file.

use crate::models::{Feature, MapError, Result};
use crate::render::RenderConfig;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_JSON: &str = include_str!("../static/default_config.json");

pub const DEFAULT_NAME_ATTRIBUTE: &str = "NAME";

fn default_name_attribute() -> String {
    DEFAULT_NAME_ATTRIBUTE.to_string()
}

// ============================================================================
// Predicates
// ============================================================================

/// A boolean condition over one feature's attributes.
///
/// String matching is case-sensitive. `contains` is substring containment, so
/// `contains NAME "BRT"` also matches "Dundas BRT Extension".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Equals { attribute: String, value: String },
    OneOf { attribute: String, values: Vec<String> },
    Contains { attribute: String, substring: String },
    ContainsAny { attribute: String, substrings: Vec<String> },
    /// True when every rule holds (true when empty).
    All { rules: Vec<Predicate> },
    /// True when at least one rule holds (false when empty).
    Any { rules: Vec<Predicate> },
    Not { rule: Box<Predicate> },
}

impl Predicate {
    pub fn equals(attribute: &str, value: &str) -> Self {
        Predicate::Equals {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    pub fn one_of(attribute: &str, values: &[&str]) -> Self {
        Predicate::OneOf {
            attribute: attribute.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn contains(attribute: &str, substring: &str) -> Self {
        Predicate::Contains {
            attribute: attribute.to_string(),
            substring: substring.to_string(),
        }
    }

    pub fn contains_any(attribute: &str, substrings: &[&str]) -> Self {
        Predicate::ContainsAny {
            attribute: attribute.to_string(),
            substrings: substrings.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn all(rules: Vec<Predicate>) -> Self {
        Predicate::All { rules }
    }

    pub fn any(rules: Vec<Predicate>) -> Self {
        Predicate::Any { rules }
    }

    pub fn evaluate(&self, feature: &Feature) -> bool {
        match self {
            Predicate::Equals { attribute, value } => feature.attribute(attribute) == Some(value.as_str()),
            Predicate::OneOf { attribute, values } => feature
                .attribute(attribute)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Predicate::Contains { attribute, substring } => feature
                .attribute(attribute)
                .is_some_and(|v| v.contains(substring.as_str())),
            Predicate::ContainsAny { attribute, substrings } => feature
                .attribute(attribute)
                .is_some_and(|v| substrings.iter().any(|s| v.contains(s.as_str()))),
            Predicate::All { rules } => rules.iter().all(|rule| rule.evaluate(feature)),
            Predicate::Any { rules } => rules.iter().any(|rule| rule.evaluate(feature)),
            Predicate::Not { rule } => !rule.evaluate(feature),
        }
    }

    /// Every column this predicate reads.
    pub fn attributes(&self) -> BTreeSet<&str> {
        let mut attributes = BTreeSet::new();
        self.collect_attributes(&mut attributes);
        attributes
    }

    fn collect_attributes<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Predicate::Equals { attribute, .. }
            | Predicate::OneOf { attribute, .. }
            | Predicate::Contains { attribute, .. }
            | Predicate::ContainsAny { attribute, .. } => {
                out.insert(attribute.as_str());
            }
            Predicate::All { rules } | Predicate::Any { rules } => {
                for rule in rules {
                    rule.collect_attributes(out);
                }
            }
            Predicate::Not { rule } => rule.collect_attributes(out),
        }
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not { rule: Box::new(self) }
    }
}

// ============================================================================
// Subset Rules
// ============================================================================

/// Keeps stations whose `station_attribute` names one of the subset's lines,
/// or appears in `supplemental` (names the two datasets spell differently).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationJoin {
    #[serde(default = "default_name_attribute")]
    pub line_attribute: String,
    #[serde(default = "default_name_attribute")]
    pub station_attribute: String,
    #[serde(default)]
    pub supplemental: Vec<String>,
}

impl Default for StationJoin {
    fn default() -> Self {
        StationJoin {
            line_attribute: default_name_attribute(),
            station_attribute: default_name_attribute(),
            supplemental: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Earlier subset to narrow; the full lines table when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub steps: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stations: Option<StationJoin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    pub subsets: Vec<SubsetRule>,
    pub render: RenderConfig,
}

impl MapConfig {
    /// The rules shipped with the binary.
    pub fn embedded() -> Result<Self> {
        Self::from_json(DEFAULT_CONFIG_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: MapConfig = serde_json::from_str(json)
            .map_err(|e| MapError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                MapError::FileNotFound(path.display().to_string())
            } else {
                MapError::FileError(format!("Failed to read {}: {}", path.display(), e))
            }
        })?;
        Self::from_json(&contents)
            .map_err(|e| MapError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("transit_map").join("config.json"))
    }

    /// Explicit path, else the user config file when present, else the embedded rules.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        match Self::user_config_path() {
            Some(path) if path.exists() => {
                debug!("using user config {:?}", path);
                Self::from_path(&path)
            }
            _ => Self::embedded(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.subsets.is_empty() {
            return Err(MapError::ConfigError("no subsets defined".to_string()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for rule in &self.subsets {
            if rule.name.trim().is_empty() {
                return Err(MapError::ConfigError("subset with empty name".to_string()));
            }
            if let Some(source) = &rule.source {
                if !seen.contains(source.as_str()) {
                    return Err(MapError::ConfigError(format!(
                        "subset '{}' narrows '{}', which is not defined before it",
                        rule.name, source
                    )));
                }
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(MapError::ConfigError(format!(
                    "subset '{}' defined twice",
                    rule.name
                )));
            }
        }

        if !seen.contains(self.render.subset.as_str()) {
            return Err(MapError::ConfigError(format!(
                "render subset '{}' is not defined",
                self.render.subset
            )));
        }

        self.render.style.validate()
    }

    pub fn subset(&self, name: &str) -> Option<&SubsetRule> {
        self.subsets.iter().find(|rule| rule.name == name)
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MapError::ConfigError(format!("Failed to serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str, technology: &str, status: &str) -> Feature {
        Feature::new(None)
            .with_attribute("NAME", name)
            .with_attribute("TECHNOLOGY", technology)
            .with_attribute("STATUS", status)
    }

    #[test]
    fn embedded_config_is_valid() {
        let config = MapConfig::embedded().unwrap();
        let names: Vec<&str> = config.subsets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["non_go", "core", "rapid"]);
        assert_eq!(config.subset("rapid").unwrap().source.as_deref(), Some("core"));
        assert!(config.render.colors.contains_key("Line 1: Yonge-University"));
    }

    #[test]
    fn contains_is_substring_match() {
        let p = Predicate::contains_any("NAME", &["BRT", "Transitway"]);
        assert!(p.evaluate(&line("Dundas BRT Extension", "LRT / BRT", "Proposed")));
        assert!(p.evaluate(&line("Mississauga Transitway", "LRT / BRT", "Existing")));
        assert!(!p.evaluate(&line("Line 2: Bloor-Danforth", "Subway", "Existing")));
        // case-sensitive
        assert!(!p.evaluate(&line("brt connector", "LRT / BRT", "Existing")));
    }

    #[test]
    fn combinators() {
        let subway = line("Line 1: Yonge-University", "Subway", "Existing");
        let go = line("Lakeshore West", "GO Rail - All-day", "Existing");

        let not_go = !Predicate::contains("TECHNOLOGY", "GO Rail");
        assert!(not_go.evaluate(&subway));
        assert!(!not_go.evaluate(&go));

        assert!(Predicate::all(vec![]).evaluate(&subway));
        assert!(!Predicate::any(vec![]).evaluate(&subway));

        let either = Predicate::any(vec![
            Predicate::equals("TECHNOLOGY", "Subway"),
            Predicate::one_of("NAME", &["Lakeshore West"]),
        ]);
        assert!(either.evaluate(&subway));
        assert!(either.evaluate(&go));
    }

    #[test]
    fn absent_attribute_never_matches() {
        let feature = Feature::new(None).with_attribute("NAME", "X");
        assert!(!Predicate::equals("STATUS", "Existing").evaluate(&feature));
        assert!((!Predicate::equals("STATUS", "Existing")).evaluate(&feature));
    }

    #[test]
    fn attributes_are_collected_recursively() {
        let p = Predicate::all(vec![
            Predicate::one_of("STATUS", &["Existing"]),
            !Predicate::any(vec![
                Predicate::contains("NAME", "BRT"),
                Predicate::equals("TECHNOLOGY", "LRT / BRT"),
            ]),
        ]);
        let attributes: Vec<&str> = p.attributes().into_iter().collect();
        assert_eq!(attributes, vec!["NAME", "STATUS", "TECHNOLOGY"]);
    }

    #[test]
    fn predicates_round_trip_through_json() {
        let json = r#"{"op":"not","rule":{"op":"contains","attribute":"TECHNOLOGY","substring":"GO Rail"}}"#;
        let p: Predicate = serde_json::from_str(json).unwrap();
        assert_eq!(p, !Predicate::contains("TECHNOLOGY", "GO Rail"));
    }

    #[test]
    fn validate_rejects_forward_sources() {
        let mut config = MapConfig::embedded().unwrap();
        config.subsets[0].source = Some("rapid".to_string());
        assert!(matches!(config.validate(), Err(MapError::ConfigError(_))));
    }

    #[test]
    fn validate_rejects_duplicates_and_unknown_render_subset() {
        let mut config = MapConfig::embedded().unwrap();
        config.subsets[1].name = "non_go".to_string();
        assert!(matches!(config.validate(), Err(MapError::ConfigError(_))));

        let mut config = MapConfig::embedded().unwrap();
        config.render.subset = "express".to_string();
        assert!(matches!(config.validate(), Err(MapError::ConfigError(_))));
    }

    #[test]
    fn from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            MapConfig::from_path(&dir.path().join("config.json")),
            Err(MapError::FileNotFound(_))
        ));
    }

    #[test]
    fn from_path_reads_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "subsets": [{"name": "all"}],
                "render": {"subset": "all"}
            }"#,
        )
        .unwrap();
        let config = MapConfig::from_path(&path).unwrap();
        assert_eq!(config.subsets[0].steps.len(), 0);
        assert!(config.render.colors.is_empty());
        assert_eq!(config.render.name_attribute, "NAME");
    }
}
