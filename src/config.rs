//! Configuration for the zonal panel pipeline.

use crate::table::JoinPolicy;
use crate::transform::{OutsideFootprint, SpatialReducer, TemporalReducer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Region boundary source
    pub regions: RegionsConfig,

    /// Raster time-series store
    pub rasters: RasterStoreConfig,

    /// Years to process, one column per (metric, year)
    #[serde(default = "default_years")]
    pub years: Vec<i32>,

    /// Metrics computed for every year, in declared order
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricConfig>,

    /// Join behaviour of the table accumulator
    #[serde(default)]
    pub join: JoinConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Export configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Region boundary source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionsConfig {
    /// Path to a GeoJSON FeatureCollection of region polygons
    pub path: PathBuf,

    /// Feature property holding the unique region name
    #[serde(default = "default_identity_column")]
    pub identity_column: String,

    /// CRS of the region geometries. When set, every raster source must match.
    #[serde(default)]
    pub crs: Option<String>,
}

/// Raster store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterStoreConfig {
    /// Local directory or `s3://bucket/prefix` holding one prefix per source id
    pub root: String,
}

/// One metric computed per year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Column prefix, e.g. `NTL` produces `NTL_2019`
    pub output_prefix: String,

    /// Raster source id (path under the raster store root)
    pub source_id: String,

    /// Band selected from each image
    pub band: String,

    /// Sampling scale in the raster CRS units
    pub scale: f64,

    /// How a year of images collapses to one raster
    #[serde(default)]
    pub temporal_reducer: TemporalReducer,

    /// How a region's samples collapse to one value
    #[serde(default)]
    pub spatial_reducer: SpatialReducer,
}

/// Join configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Left join keeps every region; inner join drops regions a table lacks
    #[serde(default)]
    pub policy: JoinPolicy,

    /// What to do with regions entirely outside a raster's footprint
    #[serde(default)]
    pub outside_footprint: OutsideFootprint,
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of metric-year tables computed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum concurrent image reads per reduction
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Rayon thread pool size for zonal aggregation
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Progress report interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch_concurrency: 8,
            worker_threads: None,
            rayon_threads: None,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

/// Export file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    #[default]
    Csv,
    Parquet,
}

impl TableFormat {
    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Parquet => "parquet",
        }
    }
}

/// Export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory the table is written into
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,

    /// Export name, used as the file stem
    #[serde(default = "default_description")]
    pub description: String,

    /// File format
    #[serde(default)]
    pub format: TableFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            description: default_description(),
            format: TableFormat::default(),
        }
    }
}

impl OutputConfig {
    /// Full path of the exported file.
    pub fn file_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.description, self.format.extension()))
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Distinct source ids referenced by the metrics, in declared order.
    pub fn source_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.metrics
            .iter()
            .map(|m| m.source_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.regions.identity_column.trim().is_empty() {
            anyhow::bail!("Region identity column must not be empty");
        }
        if self.rasters.root.trim().is_empty() {
            anyhow::bail!("Raster store root must not be empty");
        }

        let mut years = HashSet::new();
        for year in &self.years {
            if !years.insert(*year) {
                anyhow::bail!("Year {} is listed more than once", year);
            }
        }

        let mut prefixes = HashSet::new();
        for metric in &self.metrics {
            if metric.output_prefix.trim().is_empty() {
                anyhow::bail!("Metric output prefix must not be empty");
            }
            if metric.output_prefix == self.regions.identity_column {
                anyhow::bail!(
                    "Metric prefix {} collides with the identity column",
                    metric.output_prefix
                );
            }
            if !prefixes.insert(metric.output_prefix.as_str()) {
                anyhow::bail!("Metric prefix {} is listed more than once", metric.output_prefix);
            }
            if metric.source_id.trim().is_empty() || metric.band.trim().is_empty() {
                anyhow::bail!("Metric {} needs a source id and a band", metric.output_prefix);
            }
            if !metric.scale.is_finite() || metric.scale <= 0.0 {
                anyhow::bail!(
                    "Metric {} scale must be a positive number, got {}",
                    metric.output_prefix,
                    metric.scale
                );
            }
        }

        if self.processing.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }
        if self.processing.fetch_concurrency == 0 {
            anyhow::bail!("Fetch concurrency must be > 0");
        }

        let description = &self.output.description;
        if description.trim().is_empty() {
            anyhow::bail!("Output description must not be empty");
        }
        if description.contains('/') || description.contains('\\') {
            anyhow::bail!("Output description must not contain path separators: {}", description);
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_identity_column() -> String { "NAME_1".to_string() }
fn default_years() -> Vec<i32> { (2019..=2024).collect() }
fn default_concurrency() -> usize { 4 }
fn default_fetch_concurrency() -> usize { 8 }
fn default_metrics_interval() -> u64 { 10 }
fn default_output_directory() -> PathBuf { PathBuf::from("output") }
fn default_description() -> String { "NTL_dan_NO2_per_Provinsi".to_string() }

fn default_metrics() -> Vec<MetricConfig> {
    vec![
        MetricConfig {
            output_prefix: "NTL".to_string(),
            source_id: "NOAA/VIIRS/DNB/MONTHLY_V1/VCMCFG".to_string(),
            band: "avg_rad".to_string(),
            scale: 500.0,
            temporal_reducer: TemporalReducer::Mean,
            spatial_reducer: SpatialReducer::Sum,
        },
        MetricConfig {
            output_prefix: "NO2".to_string(),
            source_id: "COPERNICUS/S5P/OFFL/L3_NO2".to_string(),
            band: "tropospheric_NO2_column_number_density".to_string(),
            // Matches the Sentinel-5P native resolution
            scale: 5000.0,
            temporal_reducer: TemporalReducer::Mean,
            spatial_reducer: SpatialReducer::Sum,
        },
    ]
}
