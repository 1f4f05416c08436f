//! Run statistics and progress reporting.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for the pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Number of image bands read
    pub images_read: AtomicU64,

    /// Total bytes read from the raster store
    pub bytes_read: AtomicU64,

    /// Number of metric-year tables computed
    pub metric_tables: AtomicU64,

    /// Number of region values aggregated
    pub regions_aggregated: AtomicU64,

    /// Number of region values left missing
    pub missing_values: AtomicU64,

    /// Master rows filled with a missing value by left joins
    pub rows_filled: AtomicU64,

    /// Master rows dropped by inner joins
    pub rows_dropped: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-phase timing (in microseconds for precision)
    /// Time spent in temporal reduction, including reads (microseconds)
    pub reduce_us: AtomicU64,

    /// Time spent in zonal aggregation (microseconds)
    pub zonal_us: AtomicU64,

    /// Time spent merging tables (microseconds)
    pub merge_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record one image read of `bytes` bytes.
    pub fn add_image_read(&self, bytes: u64) {
        self.images_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a computed metric-year table.
    pub fn add_metric_table(&self, regions: u64, missing: u64) {
        self.metric_tables.fetch_add(1, Ordering::Relaxed);
        self.regions_aggregated.fetch_add(regions, Ordering::Relaxed);
        self.missing_values.fetch_add(missing, Ordering::Relaxed);
    }

    /// Record join fills and drops.
    pub fn add_join_changes(&self, filled: u64, dropped: u64) {
        self.rows_filled.fetch_add(filled, Ordering::Relaxed);
        self.rows_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn add_reduce_time(&self, duration: Duration) {
        self.reduce_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_zonal_time(&self, duration: Duration) {
        self.zonal_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_merge_time(&self, duration: Duration) {
        self.merge_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get images read per second.
    pub fn images_per_second(&self) -> f64 {
        let images = self.images_read.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            images as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            images_read: self.images_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            metric_tables: self.metric_tables.load(Ordering::Relaxed),
            regions_aggregated: self.regions_aggregated.load(Ordering::Relaxed),
            missing_values: self.missing_values.load(Ordering::Relaxed),
            rows_filled: self.rows_filled.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            images_per_second: self.images_per_second(),
            reduce_secs: self.reduce_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            zonal_secs: self.zonal_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            merge_secs: self.merge_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub images_read: u64,
    pub bytes_read: u64,
    pub metric_tables: u64,
    pub regions_aggregated: u64,
    pub missing_values: u64,
    pub rows_filled: u64,
    pub rows_dropped: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub images_per_second: f64,
    /// Total time spent reducing stacks (seconds, summed across tasks)
    pub reduce_secs: f64,
    /// Total time spent in zonal aggregation (seconds, summed across tasks)
    pub zonal_secs: f64,
    /// Total time spent merging tables (seconds)
    pub merge_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total_phase_time = self.reduce_secs + self.zonal_secs + self.merge_secs;
        let (reduce_pct, zonal_pct, merge_pct) = if total_phase_time > 0.0 {
            (
                self.reduce_secs / total_phase_time * 100.0,
                self.zonal_secs / total_phase_time * 100.0,
                self.merge_secs / total_phase_time * 100.0,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        write!(
            f,
            "Tables: {} | Images: {} ({:.1} MB) | Regions: {} aggregated, {} missing | \
             Joins: {} filled, {} dropped | Elapsed: {:.1}s | \
             Time: reduce {:.0}% | zonal {:.0}% | merge {:.0}%",
            self.metric_tables,
            self.images_read,
            self.bytes_read as f64 / (1024.0 * 1024.0),
            self.regions_aggregated,
            self.missing_values,
            self.rows_filled,
            self.rows_dropped,
            self.elapsed.as_secs_f64(),
            reduce_pct,
            zonal_pct,
            merge_pct,
        )
    }
}

/// Periodic progress reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_tables: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_tables: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_tables,
        }
    }

    /// Report progress until `shutdown` fires.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("[{:.1}%] {}", progress_pct(snapshot.metric_tables, self.total_tables), snapshot);
                }
                _ = shutdown.recv() => break,
            }
        }
    }

    /// Log a final summary.
    pub fn log_summary(&self) {
        let snapshot = self.metrics.snapshot();

        tracing::info!("=== Run Summary ===");
        tracing::info!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        tracing::info!("Metric-year tables: {}/{}", snapshot.metric_tables, self.total_tables);
        tracing::info!(
            "Images read: {} ({:.2} MB, {:.1} images/s)",
            snapshot.images_read,
            snapshot.bytes_read as f64 / (1024.0 * 1024.0),
            snapshot.images_per_second
        );
        tracing::info!(
            "Region values: {} aggregated, {} missing",
            snapshot.regions_aggregated,
            snapshot.missing_values
        );
        tracing::info!(
            "Join changes: {} rows filled, {} rows dropped",
            snapshot.rows_filled,
            snapshot.rows_dropped
        );

        let total_phase = snapshot.reduce_secs + snapshot.zonal_secs + snapshot.merge_secs;
        if total_phase > 0.0 {
            tracing::info!(
                "Phases: reduce {:.1}s, zonal {:.1}s, merge {:.3}s",
                snapshot.reduce_secs,
                snapshot.zonal_secs,
                snapshot.merge_secs
            );
        }
    }
}

fn progress_pct(done: u64, total: u64) -> f64 {
    if total > 0 {
        done as f64 / total as f64 * 100.0
    } else {
        100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reads() {
        let metrics = Metrics::new();

        metrics.add_image_read(1000);
        metrics.add_image_read(500);

        assert_eq!(metrics.images_read.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.bytes_read.load(Ordering::Relaxed), 1500);
    }

    #[test]
    fn test_all_counters() {
        let metrics = Metrics::new();

        metrics.add_image_read(1024);
        metrics.add_metric_table(34, 2);
        metrics.add_metric_table(34, 0);
        metrics.add_join_changes(3, 1);

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.images_read, 1);
        assert_eq!(snapshot.bytes_read, 1024);
        assert_eq!(snapshot.metric_tables, 2);
        assert_eq!(snapshot.regions_aggregated, 68);
        assert_eq!(snapshot.missing_values, 2);
        assert_eq!(snapshot.rows_filled, 3);
        assert_eq!(snapshot.rows_dropped, 1);
    }

    #[test]
    fn test_timing_metrics() {
        let metrics = Metrics::new();

        metrics.add_reduce_time(Duration::from_millis(100));
        metrics.add_zonal_time(Duration::from_millis(50));
        metrics.add_merge_time(Duration::from_millis(25));

        let snapshot = metrics.snapshot();

        assert!((snapshot.reduce_secs - 0.1).abs() < 0.001);
        assert!((snapshot.zonal_secs - 0.05).abs() < 0.001);
        assert!((snapshot.merge_secs - 0.025).abs() < 0.001);
    }

    #[test]
    fn test_snapshot_display() {
        let metrics = Metrics::new();
        metrics.add_metric_table(34, 5);
        metrics.add_join_changes(5, 0);

        let display = format!("{}", metrics.snapshot());

        assert!(display.contains("Tables: 1"));
        assert!(display.contains("34 aggregated, 5 missing"));
        assert!(display.contains("5 filled, 0 dropped"));
    }

    #[test]
    fn test_snapshot_json() {
        let metrics = Metrics::new();
        metrics.add_image_read(16);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        metrics.snapshot().save_to_file(path.to_str().unwrap()).unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["images_read"], 1);
        assert_eq!(json["bytes_read"], 16);
        assert!(json["elapsed"].is_f64());
    }

    #[test]
    fn test_zero_elapsed_no_panic() {
        let metrics = Metrics {
            start_time: None,
            ..Default::default()
        };

        metrics.add_image_read(1000);
        assert_eq!(metrics.images_per_second(), 0.0);
    }

    #[test]
    fn test_progress_pct() {
        assert_eq!(progress_pct(1, 4), 25.0);
        assert_eq!(progress_pct(0, 0), 100.0);
    }

    #[tokio::test]
    async fn test_reporter_stops_on_shutdown() {
        let reporter = MetricsReporter::new(Metrics::new(), 60, 4);
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(reporter.run(rx));

        tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}
