//! Drives every (year, metric) job and folds the results into the master table.
//!
//! Jobs run in year-ascending, metric-declared order. Up to `concurrency`
//! jobs are in flight at once, but results are merged strictly in job order,
//! so the column order of the master table never depends on timing.

use crate::config::MetricConfig;
use crate::pipeline::{Metrics, MetricsReporter, YearlyMetricPipeline};
use crate::table::{JoinPolicy, MasterTable, TableAccumulator};
use anyhow::Result;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// One unit of work: one metric for one year.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub year: i32,
    pub metric: MetricConfig,
}

/// Expand years and metrics into jobs: years ascending, metrics in declared order.
pub fn plan_jobs(years: &[i32], metrics: &[MetricConfig]) -> Vec<Job> {
    let mut years = years.to_vec();
    years.sort_unstable();
    years.dedup();

    years
        .into_iter()
        .flat_map(|year| {
            metrics.iter().map(move |metric| Job {
                year,
                metric: metric.clone(),
            })
        })
        .collect()
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Join policy of the accumulator
    pub policy: JoinPolicy,

    /// Number of jobs computed concurrently
    pub concurrency: usize,

    /// Progress report interval in seconds, `None` disables reporting
    pub metrics_interval_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            policy: JoinPolicy::Left,
            concurrency: 4,
            metrics_interval_secs: None,
        }
    }
}

/// Summary of an orchestrated run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Metric-year tables merged
    pub tables_merged: usize,

    /// Master rows filled by left joins
    pub rows_filled: usize,

    /// Master rows dropped by inner joins
    pub rows_dropped: usize,
}

/// Runs all jobs and accumulates the master table.
pub struct Orchestrator {
    pipeline: Arc<YearlyMetricPipeline>,
    metrics: Arc<Metrics>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<YearlyMetricPipeline>, metrics: Arc<Metrics>, config: OrchestratorConfig) -> Self {
        Self {
            pipeline,
            metrics,
            config,
        }
    }

    /// Compute and merge every job, stopping at the first failure.
    ///
    /// With no years or no metrics the result is the identity-only table.
    pub async fn run(&self, years: &[i32], metrics: &[MetricConfig]) -> Result<(MasterTable, RunStats)> {
        let jobs = plan_jobs(years, metrics);
        let total_jobs = jobs.len();

        tracing::info!(
            "Scheduling {} metric-year tables ({} concurrent, {:?} join)",
            total_jobs,
            self.config.concurrency,
            self.config.policy
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = match self.config.metrics_interval_secs {
            Some(secs) => {
                let reporter = MetricsReporter::new(self.metrics.clone(), secs, total_jobs as u64);
                Some(tokio::spawn(reporter.run(shutdown_rx)))
            }
            None => {
                drop(shutdown_rx);
                None
            }
        };

        let initial = TableAccumulator::new(
            MasterTable::from_regions(self.pipeline.regions()),
            self.config.policy,
        );

        let mut current_year = None;
        let result = stream::iter(jobs)
            .map(|job| {
                let pipeline = self.pipeline.clone();
                async move {
                    let table = pipeline.compute_metric_year(&job.metric, job.year).await?;
                    Ok::<_, anyhow::Error>((job.year, table))
                }
            })
            .buffered(self.config.concurrency.max(1))
            .try_fold(initial, |acc, (year, table)| {
                if current_year != Some(year) {
                    tracing::info!("Processing year {}", year);
                    current_year = Some(year);
                }
                let metrics = self.metrics.clone();
                async move {
                    let start = Instant::now();
                    let before = (acc.rows_filled(), acc.rows_dropped());
                    let acc = acc.absorb(&table)?;
                    metrics.add_merge_time(start.elapsed());
                    metrics.add_join_changes(
                        (acc.rows_filled() - before.0) as u64,
                        (acc.rows_dropped() - before.1) as u64,
                    );
                    Ok::<_, anyhow::Error>(acc)
                }
            })
            .await;

        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        let acc = result?;
        let stats = RunStats {
            tables_merged: acc.merges(),
            rows_filled: acc.rows_filled(),
            rows_dropped: acc.rows_dropped(),
        };

        tracing::info!(
            "Merged {} tables into {} rows x {} columns",
            stats.tables_merged,
            acc.table().len(),
            acc.table().schema().len()
        );

        Ok((acc.finish(), stats))
    }
}
