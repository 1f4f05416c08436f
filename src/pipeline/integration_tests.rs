//! End-to-end tests: raster store → yearly metric tables → master table → export.
//!
//! Test layout: every raster source uses 10-unit pixels with the grid origin
//! at (0, 20). Region A covers [0, 20] x [0, 20], region B covers [20, 40] x [0, 20].

use crate::config::{Config, MetricConfig, RasterStoreConfig, RegionsConfig};
use crate::index::{RasterGrid, Region, RegionTable};
use crate::io::test_support::{write_source, TestImage};
use crate::io::{RasterSource, RasterStore};
use crate::pipeline::{Metrics, Orchestrator, OrchestratorConfig, YearlyMetricPipeline};
use crate::table::{JoinPolicy, MasterTable};
use crate::transform::{OutsideFootprint, SpatialReducer, TemporalReducer};
use geo::{polygon, MultiPolygon};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectStore, ObjectStoreExt};
use std::collections::HashMap;
use std::sync::Arc;

fn rect_region(name: &str, min_x: f64, max_x: f64) -> Region {
    let poly = polygon![
        (x: min_x, y: 0.0),
        (x: max_x, y: 0.0),
        (x: max_x, y: 20.0),
        (x: min_x, y: 20.0),
        (x: min_x, y: 0.0),
    ];
    Region::new(name, MultiPolygon::new(vec![poly]))
}

fn two_regions() -> Arc<RegionTable> {
    Arc::new(
        RegionTable::new(
            "NAME_1",
            vec![rect_region("A", 0.0, 20.0), rect_region("B", 20.0, 40.0)],
        )
        .unwrap(),
    )
}

fn grid(width: usize) -> RasterGrid {
    RasterGrid {
        crs: "EPSG:6933".to_string(),
        origin_x: 0.0,
        origin_y: 20.0,
        pixel_size: 10.0,
        width,
        height: 2,
        nodata: Some(-9999.0),
    }
}

fn metric(prefix: &str, source_id: &str) -> MetricConfig {
    MetricConfig {
        output_prefix: prefix.to_string(),
        source_id: source_id.to_string(),
        band: "b1".to_string(),
        scale: 10.0,
        temporal_reducer: TemporalReducer::Mean,
        spatial_reducer: SpatialReducer::Sum,
    }
}

/// Source `ntl` covers A and B with two images per year; source `no2` covers both with one.
async fn write_two_sources(store: &Arc<dyn ObjectStore>, prefix: &str) {
    let wide = grid(4);
    write_source(
        store,
        prefix,
        "ntl",
        &wide,
        &[
            TestImage::full("n19a", "2019-01-01", "b1", &wide, vec![1.0; 8]),
            TestImage::full("n19b", "2019-12-31", "b1", &wide, vec![3.0; 8]),
            TestImage::full("n20a", "2020-06-01", "b1", &wide, vec![5.0; 8]),
        ],
    )
    .await
    .unwrap();

    write_source(
        store,
        prefix,
        "no2",
        &wide,
        &[
            TestImage::full("s19", "2019-03-01", "b1", &wide, vec![0.5, 0.5, 1.0, 1.0, 0.5, 0.5, 1.0, 1.0]),
            TestImage::full("s20", "2020-03-01", "b1", &wide, vec![0.25; 8]),
        ],
    )
    .await
    .unwrap();
}

async fn open(store: Arc<dyn ObjectStore>, ids: &[&str], metrics: &Arc<Metrics>) -> HashMap<String, Arc<RasterSource>> {
    let raster_store = RasterStore::new(store, "", metrics.clone());
    let mut sources = HashMap::new();
    for id in ids {
        sources.insert(id.to_string(), Arc::new(raster_store.open_source(id).await.unwrap()));
    }
    sources
}

fn orchestrator(
    regions: Arc<RegionTable>,
    sources: HashMap<String, Arc<RasterSource>>,
    outside: OutsideFootprint,
    policy: JoinPolicy,
    metrics: Arc<Metrics>,
) -> Orchestrator {
    let pipeline = Arc::new(YearlyMetricPipeline::new(regions, sources, outside, 4, metrics.clone()));
    Orchestrator::new(
        pipeline,
        metrics,
        OrchestratorConfig {
            policy,
            concurrency: 3,
            metrics_interval_secs: None,
        },
    )
}

/// Raster covering only region A: a 2x2 grid over [0, 20] x [0, 20].
async fn run_coverage_only_a(outside: OutsideFootprint, policy: JoinPolicy) -> MasterTable {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let narrow = grid(2);
    write_source(
        &store,
        "",
        "ntl",
        &narrow,
        &[TestImage::full("n19", "2019-05-01", "b1", &narrow, vec![1.0, 2.0, 3.0, 4.0])],
    )
    .await
    .unwrap();

    let metrics = Metrics::new();
    let sources = open(store, &["ntl"], &metrics).await;
    let (table, _) = orchestrator(two_regions(), sources, outside, policy, metrics)
        .run(&[2019], &[metric("NTL", "ntl")])
        .await
        .unwrap();
    table
}

#[tokio::test]
async fn test_coverage_only_a_left_join() {
    let table = run_coverage_only_a(OutsideFootprint::EmitMissing, JoinPolicy::Left).await;

    assert_eq!(table.len(), 2);
    assert_eq!(table.schema().column_names(), vec!["NAME_1", "NTL_2019"]);
    assert_eq!(table.value("A", "NTL_2019"), Some(Some(10.0)));
    assert_eq!(table.value("B", "NTL_2019"), Some(None));
}

#[tokio::test]
async fn test_coverage_only_a_left_join_keeps_dropped_region() {
    // The metric table omits B, the left join fills it back in
    let table = run_coverage_only_a(OutsideFootprint::Drop, JoinPolicy::Left).await;

    assert_eq!(table.identities(), vec!["A", "B"]);
    assert_eq!(table.value("B", "NTL_2019"), Some(None));
}

#[tokio::test]
async fn test_coverage_only_a_inner_join() {
    let table = run_coverage_only_a(OutsideFootprint::Drop, JoinPolicy::Inner).await;

    assert_eq!(table.identities(), vec!["A"]);
    assert_eq!(table.value("A", "NTL_2019"), Some(Some(10.0)));
    assert_eq!(table.value("B", "NTL_2019"), None);
}

#[tokio::test]
async fn test_inner_join_keeps_missing_values_that_were_emitted() {
    let table = run_coverage_only_a(OutsideFootprint::EmitMissing, JoinPolicy::Inner).await;

    assert_eq!(table.len(), 2);
    assert_eq!(table.value("B", "NTL_2019"), Some(None));
}

#[tokio::test]
async fn test_two_years_two_metrics() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    write_two_sources(&store, "").await;

    let metrics = Metrics::new();
    let sources = open(store, &["ntl", "no2"], &metrics).await;
    let (table, stats) = orchestrator(two_regions(), sources, OutsideFootprint::EmitMissing, JoinPolicy::Left, metrics.clone())
        .run(&[2020, 2019], &[metric("NTL", "ntl"), metric("NO2", "no2")])
        .await
        .unwrap();

    assert_eq!(
        table.schema().column_names(),
        vec!["NAME_1", "NTL_2019", "NO2_2019", "NTL_2020", "NO2_2020"]
    );
    assert_eq!(table.len(), 2);
    assert_eq!(stats.tables_merged, 4);
    assert_eq!(stats.rows_filled, 0);

    // Mean of 1 and 3 over four 10x10 cells
    assert_eq!(table.value("A", "NTL_2019"), Some(Some(8.0)));
    assert_eq!(table.value("B", "NTL_2020"), Some(Some(20.0)));
    assert_eq!(table.value("A", "NO2_2019"), Some(Some(2.0)));
    assert_eq!(table.value("B", "NO2_2019"), Some(Some(4.0)));
    assert_eq!(table.value("A", "NO2_2020"), Some(Some(1.0)));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.metric_tables, 4);
    assert_eq!(snapshot.images_read, 5);
}

#[tokio::test]
async fn test_metric_order_does_not_change_values() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    write_two_sources(&store, "").await;

    let metrics = Metrics::new();
    let sources = open(store, &["ntl", "no2"], &metrics).await;
    let run = |order: Vec<MetricConfig>| {
        let orchestrator = orchestrator(
            two_regions(),
            sources.clone(),
            OutsideFootprint::EmitMissing,
            JoinPolicy::Left,
            metrics.clone(),
        );
        async move { orchestrator.run(&[2019], &order).await.unwrap().0 }
    };

    let forward = run(vec![metric("NTL", "ntl"), metric("NO2", "no2")]).await;
    let reverse = run(vec![metric("NO2", "no2"), metric("NTL", "ntl")]).await;

    assert_eq!(forward.schema().column_names(), vec!["NAME_1", "NTL_2019", "NO2_2019"]);
    assert_eq!(reverse.schema().column_names(), vec!["NAME_1", "NO2_2019", "NTL_2019"]);
    for name in ["A", "B"] {
        for column in ["NTL_2019", "NO2_2019"] {
            assert_eq!(forward.value(name, column), reverse.value(name, column));
        }
    }
}

#[tokio::test]
async fn test_empty_years_yield_identity_only_table() {
    let metrics = Metrics::new();
    let (table, stats) = orchestrator(two_regions(), HashMap::new(), OutsideFootprint::EmitMissing, JoinPolicy::Left, metrics)
        .run(&[], &[metric("NTL", "ntl")])
        .await
        .unwrap();

    assert_eq!(table.schema().column_names(), vec!["NAME_1"]);
    assert_eq!(table.identities(), vec!["A", "B"]);
    assert_eq!(stats.tables_merged, 0);
}

#[tokio::test]
async fn test_year_without_images_gives_missing_column() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    write_two_sources(&store, "").await;

    let metrics = Metrics::new();
    let sources = open(store, &["ntl"], &metrics).await;
    let (table, _) = orchestrator(two_regions(), sources, OutsideFootprint::EmitMissing, JoinPolicy::Left, metrics)
        .run(&[2018, 2019], &[metric("NTL", "ntl")])
        .await
        .unwrap();

    assert_eq!(table.schema().column_names(), vec!["NAME_1", "NTL_2018", "NTL_2019"]);
    assert_eq!(table.column(&crate::table::ColumnKey::new("NTL", 2018)), Some(vec![None, None]));
}

#[tokio::test]
async fn test_missing_source_aborts_run() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    write_two_sources(&store, "").await;

    let metrics = Metrics::new();
    let sources = open(store, &["ntl"], &metrics).await;
    let err = orchestrator(two_regions(), sources, OutsideFootprint::EmitMissing, JoinPolicy::Left, metrics)
        .run(&[2019], &[metric("NTL", "ntl"), metric("NO2", "no2")])
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).starts_with("NO2 2019"));
}

#[tokio::test]
async fn test_missing_image_blob_aborts_run() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    write_two_sources(&store, "").await;
    store
        .delete(&crate::io::object_path("", &["ntl", "n19a/b1.f32"]))
        .await
        .unwrap();

    let metrics = Metrics::new();
    let sources = open(store, &["ntl"], &metrics).await;
    let err = orchestrator(two_regions(), sources, OutsideFootprint::EmitMissing, JoinPolicy::Left, metrics)
        .run(&[2019], &[metric("NTL", "ntl")])
        .await
        .unwrap_err();

    let message = format!("{:#}", err);
    assert!(message.starts_with("NTL 2019"));
    assert!(message.contains("n19a"));
}

const TWO_REGIONS_GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"NAME_1": "A"},
     "geometry": {"type": "Polygon", "coordinates": [[[0,0],[20,0],[20,20],[0,20],[0,0]]]}},
    {"type": "Feature", "properties": {"NAME_1": "B"},
     "geometry": {"type": "Polygon", "coordinates": [[[20,0],[40,0],[40,20],[20,20],[20,0]]]}}
  ]
}"#;

fn end_to_end_config(dir: &std::path::Path) -> Config {
    let mut config = Config::from_yaml(
        r#"
regions:
  path: unused.geojson
rasters:
  root: unused
"#,
    )
    .unwrap();
    config.regions = RegionsConfig {
        path: dir.join("provinces.geojson"),
        identity_column: "NAME_1".to_string(),
        crs: Some("EPSG:6933".to_string()),
    };
    config.rasters = RasterStoreConfig {
        root: dir.join("rasters").to_string_lossy().into_owned(),
    };
    config.years = vec![2019, 2020];
    config.metrics = vec![metric("NTL", "ntl"), metric("NO2", "no2")];
    config.output.directory = dir.join("out");
    config.output.description = "panel".to_string();
    config.processing.metrics_output_path = Some(dir.join("metrics.json").to_string_lossy().into_owned());
    config
}

async fn prepare_local_inputs(dir: &std::path::Path) {
    std::fs::write(dir.join("provinces.geojson"), TWO_REGIONS_GEOJSON).unwrap();
    let rasters = dir.join("rasters");
    std::fs::create_dir_all(&rasters).unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalFileSystem::new_with_prefix(&rasters).unwrap());
    write_two_sources(&store, "").await;
}

#[tokio::test]
async fn test_run_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    prepare_local_inputs(dir.path()).await;
    let config = end_to_end_config(dir.path());

    let summary = crate::run_pipeline(config.clone()).await.unwrap();

    assert_eq!(summary.output_path, dir.path().join("out").join("panel.csv"));
    assert_eq!(summary.rows, 2);
    assert_eq!(summary.columns, 5);
    assert_eq!(summary.metrics.metric_tables, 4);
    assert!(dir.path().join("metrics.json").exists());

    let first = std::fs::read(&summary.output_path).unwrap();
    let text = String::from_utf8(first.clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "NAME_1,NTL_2019,NO2_2019,NTL_2020,NO2_2020");
    assert_eq!(lines[1], "A,8.0,2.0,20.0,1.0");
    assert_eq!(lines[2], "B,8.0,4.0,20.0,1.0");

    // Re-running with unchanged inputs reproduces the file byte for byte
    let again = crate::run_pipeline(config).await.unwrap();
    assert_eq!(std::fs::read(&again.output_path).unwrap(), first);
}

#[tokio::test]
async fn test_run_pipeline_rejects_crs_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    prepare_local_inputs(dir.path()).await;
    let mut config = end_to_end_config(dir.path());
    config.regions.crs = Some("EPSG:4326".to_string());

    let err = crate::run_pipeline(config).await.unwrap_err();
    assert!(format!("{:#}", err).contains("EPSG:4326"));
}

#[tokio::test]
async fn test_run_pipeline_empty_years() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("provinces.geojson"), TWO_REGIONS_GEOJSON).unwrap();
    let mut config = end_to_end_config(dir.path());
    config.years.clear();

    let summary = crate::run_pipeline(config).await.unwrap();

    assert_eq!(summary.columns, 1);
    let text = std::fs::read_to_string(&summary.output_path).unwrap();
    assert_eq!(text.lines().collect::<Vec<_>>(), vec!["NAME_1", "A", "B"]);
}

#[tokio::test]
async fn test_inspect_counts_images() {
    let dir = tempfile::tempdir().unwrap();
    prepare_local_inputs(dir.path()).await;
    let config = end_to_end_config(dir.path());

    let report = crate::inspect(&config).await.unwrap();
    let counts: Vec<(&str, i32, usize)> = report
        .entries
        .iter()
        .map(|e| (e.prefix.as_str(), e.year, e.images))
        .collect();

    assert_eq!(
        counts,
        vec![("NTL", 2019, 2), ("NO2", 2019, 1), ("NTL", 2020, 1), ("NO2", 2020, 1)]
    );

    let ids: Vec<&str> = report.sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["ntl", "no2"]);
    let ntl = &report.sources[0];
    assert_eq!(ntl.tiles, 3);
    assert_eq!(ntl.bands, vec!["b1"]);
    assert_eq!(
        ntl.date_span,
        Some((
            chrono::NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2020, 6, 1).unwrap()
        ))
    );
}
