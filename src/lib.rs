//! Zonal Panel Pipeline
//!
//! Builds a wide per-region panel of yearly raster statistics: for every
//! year and metric, a stack of dated images is collapsed to its per-pixel
//! mean, summed over each region polygon with area weighting, and joined
//! into a master table as a `<prefix>_<year>` column.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Index**: Region boundaries, raster grids and dated image indexes (R-tree)
//! - **I/O**: Raster store access through object_store, CSV/Parquet export
//! - **Transform**: Temporal mean reduction and area-weighted zonal sums
//! - **Table**: Typed metric-year tables and the accumulating master table
//! - **Pipeline**: Concurrent metric-year computation folded in a fixed order
//!
//! # Usage
//!
//! ```no_run
//! use zonal_panel::{Config, run_pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     run_pipeline(config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod io;
pub mod pipeline;
pub mod table;
pub mod transform;

pub use config::{Config, MetricConfig};
pub use index::{ImageIndex, RasterGrid, RegionTable};
pub use io::{RasterSource, RasterStore};
pub use pipeline::{Metrics, MetricsSnapshot, Orchestrator, OrchestratorConfig, RunStats, YearlyMetricPipeline};
pub use table::{JoinPolicy, MasterTable, MetricYearTable, TableAccumulator};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use index::{expand_bounds, DateRange};
use pipeline::MetricsReporter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of a full pipeline run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Exported table file
    pub output_path: PathBuf,

    /// Rows in the exported table
    pub rows: usize,

    /// Columns in the exported table, identity included
    pub columns: usize,

    /// Join statistics
    pub stats: RunStats,

    /// Run metrics at completion
    pub metrics: MetricsSnapshot,
}

/// Image count of one metric for one year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectEntry {
    pub prefix: String,
    pub year: i32,
    pub images: usize,
}

/// Contents of one opened raster source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub id: String,
    pub crs: String,
    pub tiles: usize,
    pub bands: Vec<String>,
    pub date_span: Option<(NaiveDate, NaiveDate)>,
}

/// Result of [`inspect`]: sources in metric order, then one entry per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectReport {
    pub sources: Vec<SourceSummary>,
    pub entries: Vec<InspectEntry>,
}

/// Load the region table named by the configuration.
pub fn load_regions(config: &Config) -> Result<RegionTable> {
    let path = &config.regions.path;
    let regions = RegionTable::from_geojson_file(path, &config.regions.identity_column)
        .with_context(|| format!("Region boundaries unavailable: {}", path.display()))?;
    tracing::info!(
        "Loaded {} regions keyed by {} from {}",
        regions.len(),
        regions.identity_column(),
        path.display()
    );
    Ok(regions)
}

/// Open every raster source the configured metrics read from.
///
/// Fails if a source is missing or its grid CRS differs from `regions.crs`.
pub async fn open_sources(
    store: &RasterStore,
    config: &Config,
) -> Result<HashMap<String, Arc<RasterSource>>> {
    let mut sources = HashMap::new();
    for source_id in config.source_ids() {
        let source = store.open_source(source_id).await?;

        if let Some(crs) = &config.regions.crs {
            if &source.grid().crs != crs {
                anyhow::bail!(
                    "Raster source {} is in {} but regions are in {}",
                    source_id,
                    source.grid().crs,
                    crs
                );
            }
        }

        sources.insert(source_id.to_string(), Arc::new(source));
    }
    Ok(sources)
}

/// Run the full pipeline with the given configuration.
pub async fn run_pipeline(config: Config) -> Result<RunSummary> {
    config.validate()?;

    tracing::info!("Starting Zonal Panel Pipeline");

    let regions = Arc::new(load_regions(&config)?);
    let metrics = Metrics::new();

    // No year means no raster is ever queried
    let sources = if config.years.is_empty() {
        HashMap::new()
    } else {
        let store = RasterStore::from_root(&config.rasters.root, metrics.clone())?;
        open_sources(&store, &config).await?
    };

    let pipeline = Arc::new(YearlyMetricPipeline::new(
        regions,
        sources,
        config.join.outside_footprint,
        config.processing.fetch_concurrency,
        metrics.clone(),
    ));

    let orchestrator = Orchestrator::new(
        pipeline,
        metrics.clone(),
        OrchestratorConfig {
            policy: config.join.policy,
            concurrency: config.processing.concurrency,
            metrics_interval_secs: Some(config.processing.metrics_interval_secs),
        },
    );

    let (table, stats) = orchestrator.run(&config.years, &config.metrics).await?;

    let output_path = config.output.file_path();
    io::write_table(&table, &output_path, config.output.format)?;

    let total_jobs = config.years.len() * config.metrics.len();
    MetricsReporter::new(metrics.clone(), config.processing.metrics_interval_secs, total_jobs as u64)
        .log_summary();

    let snapshot = metrics.snapshot();
    if let Some(ref path) = config.processing.metrics_output_path {
        if let Err(e) = snapshot.save_to_file(path) {
            tracing::warn!("Failed to save metrics to {}: {}", path, e);
        }
    }

    tracing::info!("Pipeline complete: {}", output_path.display());

    Ok(RunSummary {
        output_path,
        rows: table.len(),
        columns: table.schema().len(),
        stats,
        metrics: snapshot,
    })
}

/// Describe the configured sources and count the images each (metric, year)
/// job would reduce, without reading pixels.
pub async fn inspect(config: &Config) -> Result<InspectReport> {
    config.validate()?;

    let regions = load_regions(config)?;
    let store = RasterStore::from_root(&config.rasters.root, Metrics::new())?;
    let sources = open_sources(&store, config).await?;
    let bounds = regions.bounds();

    let summaries = config
        .source_ids()
        .into_iter()
        .filter_map(|id| sources.get(id))
        .map(|source| SourceSummary {
            id: source.id().to_string(),
            crs: source.grid().crs.clone(),
            tiles: source.index().len(),
            bands: source.index().bands(),
            date_span: source.index().date_span(),
        })
        .collect();

    let mut entries = Vec::new();
    for job in pipeline::plan_jobs(&config.years, &config.metrics) {
        let source = sources
            .get(&job.metric.source_id)
            .with_context(|| format!("Raster source {} has not been opened", job.metric.source_id))?;
        let range = DateRange::calendar_year(job.year)?;
        let query = bounds.map(|b| expand_bounds(&b, job.metric.scale));
        let images = source.index().select(&job.metric.band, &range, query.as_ref()).len();

        entries.push(InspectEntry {
            prefix: job.metric.output_prefix,
            year: job.year,
            images,
        });
    }
    Ok(InspectReport {
        sources: summaries,
        entries,
    })
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
