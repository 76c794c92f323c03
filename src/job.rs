// One end-to-end run: load both layers, evaluate the subsets, render one.

use crate::loader::{self, DatasetSource};
use crate::models::{FeatureKind, MapError, Result};
use crate::pipeline::{self, Subset};
use crate::render::{self, MissingColorPolicy, RenderedMap};
use crate::report;
use crate::rules::MapConfig;

#[derive(Debug, Clone)]
pub struct MapJob {
    pub lines: DatasetSource,
    pub stations: DatasetSource,
    pub config: MapConfig,
    /// Overrides `config.render.subset`.
    pub subset: Option<String>,
    /// Overrides `config.render.missing_color`.
    pub missing_color: Option<MissingColorPolicy>,
    pub cache_max_age_days: u64,
}

pub struct MapRun {
    pub subsets: Vec<Subset>,
    pub rendered_subset: String,
    pub map: RenderedMap,
    pub generated_at: i64,
}

impl MapRun {
    pub fn rendered(&self) -> Option<&Subset> {
        pipeline::find_subset(&self.subsets, &self.rendered_subset)
    }

    pub fn summary(&self) -> String {
        report::summarize(&self.subsets, self.generated_at)
    }
}

impl MapJob {
    pub fn new(lines: DatasetSource, stations: DatasetSource, config: MapConfig) -> Self {
        MapJob {
            lines,
            stations,
            config,
            subset: None,
            missing_color: None,
            cache_max_age_days: loader::DEFAULT_CACHE_MAX_AGE_DAYS,
        }
    }

    pub fn render_target(&self) -> &str {
        self.subset.as_deref().unwrap_or(&self.config.render.subset)
    }

    pub fn run(&self) -> Result<MapRun> {
        let target = self.render_target().to_string();
        if self.config.subset(&target).is_none() {
            return Err(MapError::ConfigError(format!("unknown subset '{}'", target)));
        }

        println!("📍 Loading lines from {}...", self.lines.describe());
        let lines = loader::load_table_with_cache_age(&self.lines, FeatureKind::Lines, self.cache_max_age_days)?;
        println!("   ✓ Loaded {} line features", lines.len());

        println!("🚉 Loading stations from {}...", self.stations.describe());
        let stations =
            loader::load_table_with_cache_age(&self.stations, FeatureKind::Stations, self.cache_max_age_days)?;
        println!("   ✓ Loaded {} station features", stations.len());

        let subsets = pipeline::run_pipeline(&self.config, &lines, &stations)?;
        self.render_subsets(subsets, target)
    }

    /// Renders already-evaluated subsets.
    pub fn render_subsets(&self, subsets: Vec<Subset>, target: String) -> Result<MapRun> {
        let mut render_config = self.config.render.clone();
        if let Some(policy) = self.missing_color {
            render_config.missing_color = policy;
        }

        let subset = pipeline::find_subset(&subsets, &target)
            .ok_or_else(|| MapError::ConfigError(format!("unknown subset '{}'", target)))?;

        println!("🎨 Rendering subset '{}'...", target);
        let map = render::render_map(&subset.lines, subset.stations.as_ref(), &render_config)?;
        println!(
            "   ✓ {} paths in {} colors, {} stations",
            map.line_count(),
            map.assignments.len(),
            map.station_count()
        );

        Ok(MapRun {
            subsets,
            rendered_subset: target,
            map,
            generated_at: report::current_timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn unknown_render_subset_fails_before_loading() {
        let mut job = MapJob::new(
            DatasetSource::Shapefile(PathBuf::from("/nonexistent/lines.shp")),
            DatasetSource::Shapefile(PathBuf::from("/nonexistent/stations.shp")),
            MapConfig::embedded().unwrap(),
        );
        job.subset = Some("express".to_string());
        assert!(matches!(job.run(), Err(MapError::ConfigError(_))));
    }

    #[test]
    fn missing_input_surfaces_file_not_found() {
        let job = MapJob::new(
            DatasetSource::Shapefile(PathBuf::from("/nonexistent/lines.shp")),
            DatasetSource::Shapefile(PathBuf::from("/nonexistent/stations.shp")),
            MapConfig::embedded().unwrap(),
        );
        assert_eq!(job.render_target(), "core");
        assert!(matches!(job.run(), Err(MapError::FileNotFound(_))));
    }
}
