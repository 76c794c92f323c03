// Transit map generator: shapefile loading, subset rules, station joins,
// rendering and a local preview server.

pub mod job;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod rules;
pub mod server;

pub use job::{MapJob, MapRun};
pub use loader::{DatasetSource, load_table};
pub use models::{Feature, FeatureKind, FeatureTable, MapError, Result};
pub use pipeline::{JoinReport, Subset, run_pipeline};
pub use render::{MissingColorPolicy, RenderStyle, RenderedMap, render_map};
pub use rules::{MapConfig, Predicate, StationJoin, SubsetRule};
