// Command line entry point: render a transit map to a file, or serve a live preview.

use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use transit_map::loader::{self, DatasetSource};
use transit_map::render::MissingColorPolicy;
use transit_map::report;
use transit_map::rules::MapConfig;
use transit_map::server;
use transit_map::{MapJob, Result};

#[derive(Parser)]
#[command(name = "transit-map", version, about = "Filter transit shapefiles and render a network map")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render one subset to a PNG or SVG file
    Render {
        #[command(flatten)]
        input: InputArgs,

        /// Output file; the extension picks the format (.png or .svg)
        #[arg(short, long, default_value = "transit_map.png")]
        output: PathBuf,

        /// Write <subset>_lines.csv / <subset>_stations.csv for every subset here
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Render once, then serve the map and subset data over HTTP
    Serve {
        #[command(flatten)]
        input: InputArgs,

        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Export CSVs here and list them under /exports
        #[arg(long)]
        export_dir: Option<PathBuf>,
    },
    /// Print the effective rule configuration as JSON
    Rules {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Lines dataset: path.shp, bundle.zip[#member.shp] or an http(s) URL
    #[arg(long, value_parser = DatasetSource::from_arg)]
    lines: DatasetSource,

    /// Stations dataset, same forms as --lines
    #[arg(long, value_parser = DatasetSource::from_arg)]
    stations: DatasetSource,

    /// Rule configuration JSON (defaults to the user config, then the built-in rules)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Subset to render instead of the configured one
    #[arg(long)]
    subset: Option<String>,

    /// What to do with a line name that has no color
    #[arg(long, value_enum)]
    missing_color: Option<MissingColorPolicy>,

    /// Days before a downloaded dataset is fetched again
    #[arg(long, default_value_t = loader::DEFAULT_CACHE_MAX_AGE_DAYS)]
    cache_days: u64,
}

impl InputArgs {
    fn into_job(self) -> Result<MapJob> {
        let config = MapConfig::resolve(self.config.as_deref())?;
        let mut job = MapJob::new(self.lines, self.stations, config);
        job.subset = self.subset;
        job.missing_color = self.missing_color;
        job.cache_max_age_days = self.cache_days;
        Ok(job)
    }
}

// ============================================================================
// Commands
// ============================================================================

fn export_all(run: &transit_map::MapRun, dir: &std::path::Path) -> Result<()> {
    println!("💾 Exporting subsets to {}...", dir.display());
    for subset in &run.subsets {
        for path in report::export_csv(subset, dir)? {
            println!("   ✓ {}", path.display());
        }
    }
    Ok(())
}

fn render(input: InputArgs, output: PathBuf, export_dir: Option<PathBuf>) -> Result<()> {
    let job = input.into_job()?;
    let run = job.run()?;

    run.map.save(&output)?;
    println!("✓ Map written to {}", output.display());

    if let Some(dir) = &export_dir {
        export_all(&run, dir)?;
    }

    println!("\n{}", run.summary());
    Ok(())
}

fn serve(input: InputArgs, port: u16, export_dir: Option<PathBuf>) -> Result<()> {
    let job = input.into_job()?;
    let run = job.run()?;

    if let Some(dir) = &export_dir {
        export_all(&run, dir)?;
    }

    println!("\n{}", run.summary());
    server::serve(job, run, port, export_dir)
}

fn rules(config: Option<PathBuf>) -> Result<()> {
    let config = MapConfig::resolve(config.as_deref())?;
    println!("{}", config.to_pretty_json()?);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Render { input, output, export_dir } => {
            print_banner();
            render(input, output, export_dir)
        }
        Command::Serve { input, port, export_dir } => {
            print_banner();
            serve(input, port, export_dir)
        }
        Command::Rules { config } => rules(config),
    };

    if let Err(e) = result {
        eprintln!("\n╔════════════════════════════════════════════════════════════╗");
        eprintln!("║  ❌ MAP GENERATION FAILED                                  ║");
        eprintln!("╚════════════════════════════════════════════════════════════╝");
        eprintln!("\n❌ {}\n", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║                                                            ║");
    println!("║    🗺️  Transit Map Generator                                ║");
    println!("║                                                            ║");
    println!("║    Version: {:<47}║", env!("CARGO_PKG_VERSION"));
    println!("║                                                            ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");
}
