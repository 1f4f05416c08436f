//! One metric for one year: temporal reduction followed by zonal aggregation.

use crate::config::MetricConfig;
use crate::index::{expand_bounds, DateRange, RegionTable};
use crate::io::RasterSource;
use crate::pipeline::Metrics;
use crate::table::{ColumnKey, MetricYearTable};
use crate::transform::{reduce_stack, OutsideFootprint, ZonalAggregator};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Computes [`MetricYearTable`]s from opened raster sources.
pub struct YearlyMetricPipeline {
    regions: Arc<RegionTable>,
    sources: HashMap<String, Arc<RasterSource>>,
    outside: OutsideFootprint,
    fetch_concurrency: usize,
    metrics: Arc<Metrics>,
}

impl YearlyMetricPipeline {
    pub fn new(
        regions: Arc<RegionTable>,
        sources: HashMap<String, Arc<RasterSource>>,
        outside: OutsideFootprint,
        fetch_concurrency: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            regions,
            sources,
            outside,
            fetch_concurrency,
            metrics,
        }
    }

    pub fn regions(&self) -> &Arc<RegionTable> {
        &self.regions
    }

    /// Look up the opened source a metric reads from.
    pub fn source(&self, source_id: &str) -> Result<&Arc<RasterSource>> {
        self.sources
            .get(source_id)
            .with_context(|| format!("Raster source {} has not been opened", source_id))
    }

    /// Compute `<prefix>_<year>` for every region.
    pub async fn compute_metric_year(&self, metric: &MetricConfig, year: i32) -> Result<MetricYearTable> {
        self.compute(metric, year)
            .await
            .with_context(|| format!("{} {}", metric.output_prefix, year))
    }

    async fn compute(&self, metric: &MetricConfig, year: i32) -> Result<MetricYearTable> {
        let source = self.source(&metric.source_id)?.clone();
        let range = DateRange::calendar_year(year)?;
        let column = ColumnKey::new(metric.output_prefix.as_str(), year);
        let aggregator = ZonalAggregator::new(metric.spatial_reducer, metric.scale, self.outside)?;

        // Cell centers may fall up to half a cell outside the region extent
        let bounds = self.regions.bounds().map(|b| expand_bounds(&b, metric.scale));

        let snapshot = reduce_stack(
            &source,
            &metric.band,
            &range,
            bounds.as_ref(),
            metric.temporal_reducer,
            self.fetch_concurrency,
            &self.metrics,
        )
        .await?;
        if snapshot.images > 0 && !snapshot.has_data() {
            tracing::warn!("{} has no valid pixel over the regions", column);
        }

        // Zonal aggregation is CPU-bound
        let regions = self.regions.clone();
        let metrics = self.metrics.clone();
        let table = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let result = aggregator.aggregate(&snapshot, &regions, column);
            metrics.add_zonal_time(start.elapsed());
            result
        })
        .await??;

        self.metrics
            .add_metric_table(table.len() as u64, table.missing_count() as u64);
        tracing::info!(
            "Computed {}: {} regions, {} missing",
            table.column(),
            table.len(),
            table.missing_count()
        );

        Ok(table)
    }
}
