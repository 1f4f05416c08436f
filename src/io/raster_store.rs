//! Raster time-series store.
//!
//! Layout under the store root, one prefix per source id:
//!
//! ```text
//! <source_id>/grid.json       grid shared by all images of the source
//! <source_id>/index.parquet   one row per (image, band) with date and pixel window
//! <source_id>/<path>          row-major little-endian f32 pixels of one band
//! ```

use super::store::{create_raster_store, object_path};
use crate::index::{ImageIndex, ImageTile, PixelWindow, RasterGrid};
use crate::pipeline::Metrics;
use anyhow::{Context, Result};
use ndarray::Array2;
use object_store::{ObjectStore, ObjectStoreExt};
use std::sync::Arc;

/// Grid definition file name.
pub const GRID_FILE: &str = "grid.json";

/// Image index file name.
pub const INDEX_FILE: &str = "index.parquet";

/// Entry point to all raster sources under one root.
pub struct RasterStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    metrics: Arc<Metrics>,
}

impl RasterStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            metrics,
        }
    }

    /// Open a store from a local directory or `s3://` root.
    pub fn from_root(root: &str, metrics: Arc<Metrics>) -> Result<Self> {
        let (store, prefix) = create_raster_store(root)?;
        Ok(Self::new(store, prefix, metrics))
    }

    /// Load a source's grid and image index.
    pub async fn open_source(&self, source_id: &str) -> Result<RasterSource> {
        let grid_path = object_path(&self.prefix, &[source_id, GRID_FILE]);
        let grid_bytes = self
            .store
            .get(&grid_path)
            .await
            .with_context(|| format!("Raster source {} unavailable: cannot read {}", source_id, grid_path))?
            .bytes()
            .await?;
        let grid: RasterGrid = serde_json::from_slice(&grid_bytes)
            .with_context(|| format!("Invalid grid definition for source {}", source_id))?;
        grid.validate()
            .with_context(|| format!("Invalid grid definition for source {}", source_id))?;

        let index_path = object_path(&self.prefix, &[source_id, INDEX_FILE]);
        let index_bytes = self
            .store
            .get(&index_path)
            .await
            .with_context(|| format!("Raster source {} unavailable: cannot read {}", source_id, index_path))?
            .bytes()
            .await?;
        let index = ImageIndex::from_parquet_bytes(index_bytes, &grid)
            .with_context(|| format!("Invalid image index for source {}", source_id))?;

        tracing::info!(
            "Opened raster source {}: {} image bands on a {}x{} grid ({}, {} units/pixel)",
            source_id,
            index.len(),
            grid.width,
            grid.height,
            grid.crs,
            grid.pixel_size
        );

        Ok(RasterSource {
            id: source_id.to_string(),
            grid,
            index,
            store: self.store.clone(),
            prefix: self.prefix.clone(),
            metrics: self.metrics.clone(),
        })
    }
}

/// One opened raster time series.
pub struct RasterSource {
    id: String,
    grid: RasterGrid,
    index: ImageIndex,
    store: Arc<dyn ObjectStore>,
    prefix: String,
    metrics: Arc<Metrics>,
}

impl RasterSource {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn grid(&self) -> &RasterGrid {
        &self.grid
    }

    pub fn index(&self) -> &ImageIndex {
        &self.index
    }

    /// Read the pixels of one image band.
    pub async fn read_tile(&self, tile: &ImageTile) -> Result<Array2<f32>> {
        let path = object_path(&self.prefix, &[&self.id, &tile.path]);
        let bytes = self
            .store
            .get(&path)
            .await
            .with_context(|| format!("Failed to read image {} band {} from {}", tile.image_id, tile.band, path))?
            .bytes()
            .await?;

        self.metrics.add_image_read(bytes.len() as u64);
        tracing::debug!("Read image {} band {} ({} bytes)", tile.image_id, tile.band, bytes.len());

        decode_f32_le(&bytes, &tile.window)
            .with_context(|| format!("Corrupt image {} band {}", tile.image_id, tile.band))
    }
}

/// Decode row-major little-endian f32 pixels for a window.
pub fn decode_f32_le(bytes: &[u8], window: &PixelWindow) -> Result<Array2<f32>> {
    let expected = window.len() * 4;
    if bytes.len() != expected {
        anyhow::bail!("Expected {} bytes for a {}x{} window, got {}", expected, window.width, window.height, bytes.len());
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok(Array2::from_shape_vec((window.height, window.width), values)?)
}

/// Encode pixels in the store's blob format.
pub fn encode_f32_le(data: &Array2<f32>) -> Vec<u8> {
    data.iter().flat_map(|v| v.to_le_bytes()).collect()
}
