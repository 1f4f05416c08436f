//! Pipeline orchestration: per-year metric tables folded into the master table.

mod metrics;
mod orchestrator;
mod yearly;

#[cfg(test)]
mod integration_tests;

pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use orchestrator::{plan_jobs, Job, Orchestrator, OrchestratorConfig, RunStats};
pub use yearly::YearlyMetricPipeline;
