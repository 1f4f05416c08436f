//! Per-pixel temporal reduction of an image stack.

use crate::index::{Bounds, DateRange, ImageTile, PixelWindow, RasterGrid};
use crate::io::RasterSource;
use crate::pipeline::Metrics;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Temporal reducer applied per pixel over the images of one year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalReducer {
    /// Arithmetic mean of the valid observations
    #[default]
    Mean,
}

/// Accumulator for the per-pixel mean of a stack over one window of the grid.
///
/// Invalid observations (NaN or the grid's nodata value) do not contribute.
/// Pixels with no valid observation finalize to NaN. Image pixels outside
/// the window are ignored.
#[derive(Debug)]
pub struct TemporalAccumulator {
    /// Grid window covered by the accumulator
    window: PixelWindow,

    /// Sum of valid values for each pixel: (window.height, window.width)
    sum: Array2<f64>,

    /// Count of valid values for each pixel: (window.height, window.width)
    count: Array2<u32>,

    /// Number of images added
    images: usize,
}

impl TemporalAccumulator {
    pub fn new(window: PixelWindow) -> Self {
        Self {
            window,
            sum: Array2::zeros((window.height, window.width)),
            count: Array2::zeros((window.height, window.width)),
            images: 0,
        }
    }

    /// Add one image placed at `placement` of `grid`.
    pub fn add(&mut self, placement: &PixelWindow, data: &Array2<f32>, grid: &RasterGrid) -> Result<()> {
        if data.dim() != (placement.height, placement.width) {
            anyhow::bail!(
                "Image shape {:?} does not match its {}x{} window",
                data.dim(),
                placement.width,
                placement.height
            );
        }
        self.images += 1;

        let Some(overlap) = placement.intersection(&self.window) else {
            return Ok(());
        };

        let src = data.slice(s![
            overlap.y - placement.y..overlap.y - placement.y + overlap.height,
            overlap.x - placement.x..overlap.x - placement.x + overlap.width
        ]);
        let dst_rows = overlap.y - self.window.y..overlap.y - self.window.y + overlap.height;
        let dst_cols = overlap.x - self.window.x..overlap.x - self.window.x + overlap.width;

        ndarray::Zip::from(self.sum.slice_mut(s![dst_rows.clone(), dst_cols.clone()]))
            .and(self.count.slice_mut(s![dst_rows, dst_cols]))
            .and(src)
            .for_each(|sum, count, &value| {
                let value = value as f64;
                if grid.is_valid(value) {
                    *sum += value;
                    *count += 1;
                }
            });
        Ok(())
    }

    /// Number of images added so far.
    pub fn images(&self) -> usize {
        self.images
    }

    /// Compute the per-pixel mean.
    pub fn finalize(self) -> Array2<f64> {
        let mut result = Array2::from_elem(self.sum.dim(), f64::NAN);
        ndarray::Zip::from(&mut result)
            .and(&self.sum)
            .and(&self.count)
            .for_each(|out, &sum, &count| {
                if count > 0 {
                    *out = sum / count as f64;
                }
            });
        result
    }
}

/// Single-band raster produced by a temporal reduction.
///
/// Only `window` of `grid` is held in memory.
#[derive(Debug, Clone)]
pub struct RasterSnapshot {
    /// Grid the values are placed on
    pub grid: RasterGrid,

    /// Part of the grid held in `data`
    pub window: PixelWindow,

    /// Reduced values over `window`, NaN where no valid observation exists
    pub data: Array2<f64>,

    /// Number of images that went into the reduction
    pub images: usize,
}

impl RasterSnapshot {
    /// Snapshot of `window` with no valid pixel.
    pub fn empty(grid: RasterGrid, window: PixelWindow) -> Self {
        let data = Array2::from_elem((window.height, window.width), f64::NAN);
        Self {
            grid,
            window,
            data,
            images: 0,
        }
    }

    /// Value of the pixel containing a CRS coordinate, `None` outside the
    /// window or where the pixel has no data.
    pub fn value_at(&self, x: f64, y: f64) -> Option<f64> {
        let (row, col) = self.grid.world_to_pixel(x, y)?;
        let row = row.checked_sub(self.window.y)?;
        let col = col.checked_sub(self.window.x)?;
        let value = *self.data.get([row, col])?;
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    /// Check if any pixel holds a value.
    pub fn has_data(&self) -> bool {
        self.data.iter().any(|v| !v.is_nan())
    }
}

/// Reduce the images of `band` dated within `range` to one raster.
///
/// Only the pixels covering `bounds` are accumulated, or the whole grid when
/// `bounds` is `None`. Images are fetched concurrently but accumulated in
/// (date, image id) order, so the result does not depend on fetch timing.
/// An empty stack yields an all-missing snapshot.
pub async fn reduce_stack(
    source: &RasterSource,
    band: &str,
    range: &DateRange,
    bounds: Option<&Bounds>,
    reducer: TemporalReducer,
    fetch_concurrency: usize,
    metrics: &Metrics,
) -> Result<RasterSnapshot> {
    let grid = source.grid().clone();
    let window = match bounds {
        Some(b) => grid.window_covering(b).unwrap_or(PixelWindow::new(0, 0, 0, 0)),
        None => grid.full_window(),
    };

    let tiles: Vec<&ImageTile> = if window.is_empty() {
        Vec::new()
    } else {
        source.index().select(band, range, bounds)
    };

    if tiles.is_empty() {
        tracing::warn!(
            "No {} images of {} within {}",
            band,
            source.id(),
            range
        );
        return Ok(RasterSnapshot::empty(grid, window));
    }

    tracing::debug!(
        "Reducing {} {} images of {} within {} over {}x{} pixels",
        tiles.len(),
        band,
        source.id(),
        range,
        window.width,
        window.height
    );

    let start = Instant::now();
    let mut acc = match reducer {
        TemporalReducer::Mean => TemporalAccumulator::new(window),
    };

    let mut reads = stream::iter(tiles)
        .map(|tile| async move { source.read_tile(tile).await.map(|data| (tile, data)) })
        .buffered(fetch_concurrency.max(1));

    while let Some(result) = reads.next().await {
        let (tile, data) = result?;
        acc.add(&tile.window, &data, &grid)?;
    }

    let images = acc.images();
    let data = acc.finalize();
    metrics.add_reduce_time(start.elapsed());

    Ok(RasterSnapshot {
        grid,
        window,
        data,
        images,
    })
}
