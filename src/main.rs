//! Zonal Panel Pipeline CLI
//!
//! Builds a per-region table of yearly raster statistics.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zonal_panel::{build_runtime, init_rayon, inspect, run_pipeline, Config};

#[derive(Parser)]
#[command(name = "zonal-panel")]
#[command(about = "Aggregate yearly raster statistics per region into one wide table", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and export the table (default if no command specified)
    Run,

    /// Count the images behind every metric and year without reducing them
    Inspect,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, cli.concurrency)?;
        }

        Some(Commands::Inspect) => {
            inspect_command(cli.config)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(config_path: &PathBuf, concurrency: Option<usize>) -> Result<Config> {
    let mut config = Config::from_file(config_path)?;

    // Apply overrides
    if let Some(c) = concurrency {
        config.processing.concurrency = c;
    }

    config.validate()?;
    tracing::info!("Configuration loaded from {}", config_path.display());
    Ok(config)
}

fn run_command(config_path: PathBuf, concurrency: Option<usize>) -> Result<()> {
    let config = load_config(&config_path, concurrency)?;

    init_rayon(config.processing.rayon_threads)?;

    let runtime = build_runtime(config.processing.worker_threads)?;
    let summary = runtime.block_on(async { run_pipeline(config).await })?;

    println!(
        "Wrote {} rows x {} columns to {}",
        summary.rows,
        summary.columns,
        summary.output_path.display()
    );

    Ok(())
}

fn inspect_command(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path, None)?;
    let runtime = build_runtime(config.processing.worker_threads)?;
    let report = runtime.block_on(async { inspect(&config).await })?;

    println!("\n=== Raster sources ===");
    for source in &report.sources {
        let span = match source.date_span {
            Some((first, last)) => format!("{} to {}", first, last),
            None => "no images".to_string(),
        };
        println!(
            "{} ({}): {} tiles, bands [{}], {}",
            source.id,
            source.crs,
            source.tiles,
            source.bands.join(", "),
            span
        );
    }

    println!("\n=== Images per metric and year ===");
    for entry in &report.entries {
        let note = if entry.images == 0 { "  (column will be missing)" } else { "" };
        println!("{}_{}: {} images{}", entry.prefix, entry.year, entry.images, note);
    }
    println!(
        "\nOutput: {} ({} columns)",
        config.output.file_path().display(),
        1 + report.entries.len()
    );
    println!("=====================\n");

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Zonal Panel Pipeline Configuration

# === REGIONS: Province boundaries ===
regions:
  # GeoJSON FeatureCollection of Polygon/MultiPolygon features,
  # in the same CRS as the rasters
  path: "data/provinces.geojson"

  # String property used as the region identity and join key
  identity_column: "NAME_1"

  # Expected raster CRS; sources in another CRS are rejected
  # crs: "EPSG:6933"

# === RASTERS: Raster time-series store ===
# Local directory or s3://bucket/prefix. Each source lives under
# <root>/<source_id>/ with grid.json, index.parquet and f32 image blobs.
rasters:
  root: "data/rasters"

# === YEARS: One column per metric and year ===
years: [2019, 2020, 2021, 2022, 2023, 2024]

# === METRICS: Computed for every year, in this order ===
metrics:
  - output_prefix: "NTL"
    source_id: "NOAA/VIIRS/DNB/MONTHLY_V1/VCMCFG"
    band: "avg_rad"
    # Sampling cell size in raster CRS units
    scale: 500
    temporal_reducer: mean
    spatial_reducer: sum

  - output_prefix: "NO2"
    source_id: "COPERNICUS/S5P/OFFL/L3_NO2"
    band: "tropospheric_NO2_column_number_density"
    scale: 5000
    temporal_reducer: mean
    spatial_reducer: sum

# === JOIN: How metric tables are merged ===
join:
  # left keeps every region (missing values stay empty),
  # inner drops regions a metric table does not contain
  policy: left

  # Regions entirely outside a raster: emit_missing or drop
  outside_footprint: emit_missing

# === PROCESSING: Performance tuning ===
processing:
  # Metric-year tables computed concurrently
  concurrency: 4

  # Max concurrent image reads per table
  fetch_concurrency: 8

  # Tokio async worker threads (null = num CPUs)
  # worker_threads: 8

  # Rayon thread pool size for zonal aggregation (null = num CPUs)
  # rayon_threads: 8

  # Progress reporting interval in seconds
  metrics_interval_secs: 10

  # Save run metrics as JSON
  # metrics_output_path: "output/metrics.json"

# === OUTPUT: Exported table ===
output:
  directory: "output"
  # File stem of the export
  description: "NTL_dan_NO2_per_Provinsi"
  # csv or parquet
  format: csv
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
