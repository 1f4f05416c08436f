//! Helpers for writing raster sources into an object store in tests.

use super::raster_store::{encode_f32_le, GRID_FILE, INDEX_FILE};
use super::store::object_path;
use crate::index::{PixelWindow, RasterGrid};
use anyhow::Result;
use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use ndarray::Array2;
use object_store::{ObjectStore, ObjectStoreExt};
use parquet::arrow::ArrowWriter;
use std::sync::Arc;

/// One image band to place in a test source.
pub struct TestImage {
    pub image_id: String,
    pub date: String,
    pub band: String,
    pub window: PixelWindow,
    pub values: Vec<f32>,
}

impl TestImage {
    pub fn new(image_id: &str, date: &str, band: &str, window: PixelWindow, values: Vec<f32>) -> Self {
        assert_eq!(values.len(), window.len(), "values must fill the window");
        Self {
            image_id: image_id.to_string(),
            date: date.to_string(),
            band: band.to_string(),
            window,
            values,
        }
    }

    /// Image covering the whole grid.
    pub fn full(image_id: &str, date: &str, band: &str, grid: &RasterGrid, values: Vec<f32>) -> Self {
        Self::new(image_id, date, band, PixelWindow::new(0, 0, grid.width, grid.height), values)
    }

    fn blob_path(&self) -> String {
        format!("{}/{}.f32", self.image_id, self.band)
    }
}

/// Write `grid.json`, `index.parquet` and one blob per image under `prefix/source_id`.
pub async fn write_source(
    store: &Arc<dyn ObjectStore>,
    prefix: &str,
    source_id: &str,
    grid: &RasterGrid,
    images: &[TestImage],
) -> Result<()> {
    let grid_json = serde_json::to_vec(grid)?;
    store
        .put(&object_path(prefix, &[source_id, GRID_FILE]), grid_json.into())
        .await?;

    let schema = Arc::new(Schema::new(vec![
        Field::new("image_id", DataType::Utf8, false),
        Field::new("date", DataType::Utf8, false),
        Field::new("band", DataType::Utf8, false),
        Field::new("path", DataType::Utf8, false),
        Field::new("x_off", DataType::Int64, false),
        Field::new("y_off", DataType::Int64, false),
        Field::new("width", DataType::Int64, false),
        Field::new("height", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from_iter_values(images.iter().map(|i| i.image_id.as_str()))),
            Arc::new(StringArray::from_iter_values(images.iter().map(|i| i.date.as_str()))),
            Arc::new(StringArray::from_iter_values(images.iter().map(|i| i.band.as_str()))),
            Arc::new(StringArray::from_iter_values(images.iter().map(|i| i.blob_path()))),
            Arc::new(Int64Array::from_iter_values(images.iter().map(|i| i.window.x as i64))),
            Arc::new(Int64Array::from_iter_values(images.iter().map(|i| i.window.y as i64))),
            Arc::new(Int64Array::from_iter_values(images.iter().map(|i| i.window.width as i64))),
            Arc::new(Int64Array::from_iter_values(images.iter().map(|i| i.window.height as i64))),
        ],
    )?;

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    store
        .put(&object_path(prefix, &[source_id, INDEX_FILE]), buf.into())
        .await?;

    for image in images {
        let data = Array2::from_shape_vec((image.window.height, image.window.width), image.values.clone())?;
        store
            .put(
                &object_path(prefix, &[source_id, &image.blob_path()]),
                encode_f32_le(&data).into(),
            )
            .await?;
    }

    Ok(())
}
