//! Load a raster source's parquet image index and build an R-tree for spatial queries.

use super::{bounds_intersect, Bounds, PixelWindow, RasterGrid};
use anyhow::{Context, Result};
use arrow::array::{Array, Date32Array, Int32Array, Int64Array, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rstar::{RTree, RTreeObject, AABB};
use std::fmt;
use std::sync::Arc;

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// January 1 through December 31 of `year`, both inclusive.
    pub fn calendar_year(year: i32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .with_context(|| format!("Year {} is out of range", year))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)
            .with_context(|| format!("Year {} is out of range", year))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// One band of one dated image in a raster source.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTile {
    /// Image identifier (shared by the bands of one image)
    pub image_id: String,

    /// Acquisition date
    pub date: NaiveDate,

    /// Band name
    pub band: String,

    /// Blob path relative to the source prefix
    pub path: String,

    /// Placement inside the source grid
    pub window: PixelWindow,

    /// Footprint in the grid CRS [min_x, min_y, max_x, max_y]
    pub bounds: Bounds,
}

impl RTreeObject for ImageTile {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds[0], self.bounds[1]],
            [self.bounds[2], self.bounds[3]],
        )
    }
}

/// Index of all images in one raster source with date, band and spatial filtering.
#[derive(Debug)]
pub struct ImageIndex {
    /// All tiles loaded from the parquet index
    tiles: Vec<ImageTile>,

    /// R-tree for efficient spatial queries
    rtree: RTree<ImageTile>,
}

impl ImageIndex {
    /// Build an index from tiles already placed on a grid.
    pub fn new(tiles: Vec<ImageTile>) -> Self {
        let rtree = RTree::bulk_load(tiles.clone());
        Self { tiles, rtree }
    }

    /// Load index from parquet bytes, placing each row on `grid`.
    pub fn from_parquet_bytes(bytes: Bytes, grid: &RasterGrid) -> Result<Self> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let reader = builder.build()?;

        let mut tiles = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;
            Self::extract_tiles_from_batch(&batch, grid, &mut tiles)?;
        }

        tracing::debug!("Loaded {} image tiles from parquet index", tiles.len());

        Ok(Self::new(tiles))
    }

    /// Extract tiles from a record batch.
    fn extract_tiles_from_batch(
        batch: &RecordBatch,
        grid: &RasterGrid,
        tiles: &mut Vec<ImageTile>,
    ) -> Result<()> {
        let schema = batch.schema();

        let image_id_col = Self::find_column(&schema, &["image_id", "id", "system_index"])?;
        let date_col = Self::find_column(&schema, &["date", "acquired", "time_start"])?;
        let band_col = Self::find_column(&schema, &["band", "band_name"])?;
        let path_col = Self::find_column(&schema, &["path", "uri", "location"])?;
        let x_col = Self::find_column(&schema, &["x_off", "col_off", "x"])?;
        let y_col = Self::find_column(&schema, &["y_off", "row_off", "y"])?;
        let width_col = Self::find_column(&schema, &["width", "cols"])?;
        let height_col = Self::find_column(&schema, &["height", "rows"])?;

        // Image ids may be strings or integers
        let id_arr = batch.column(image_id_col);
        Self::reject_nulls(id_arr.as_ref()).context("image_id column")?;
        let image_ids: Vec<String> = if let Some(arr) = id_arr.as_any().downcast_ref::<StringArray>() {
            (0..arr.len()).map(|i| arr.value(i).to_string()).collect()
        } else {
            Self::get_usize_array(id_arr)
                .context("image_id column must be string or integer")?
                .into_iter()
                .map(|v| v.to_string())
                .collect()
        };

        let dates = Self::get_date_array(batch.column(date_col)).context("date column")?;
        let bands = Self::get_string_array(batch.column(band_col), "band")?;
        let paths = Self::get_string_array(batch.column(path_col), "path")?;

        let xs = Self::get_usize_array(batch.column(x_col)).context("x offset column")?;
        let ys = Self::get_usize_array(batch.column(y_col)).context("y offset column")?;
        let widths = Self::get_usize_array(batch.column(width_col)).context("width column")?;
        let heights = Self::get_usize_array(batch.column(height_col)).context("height column")?;

        for i in 0..batch.num_rows() {
            let window = PixelWindow::new(xs[i], ys[i], widths[i], heights[i]);
            if window.is_empty() || !grid.contains_window(&window) {
                anyhow::bail!(
                    "Image {} band {} window {:?} does not fit the {}x{} grid",
                    image_ids[i],
                    bands.value(i),
                    window,
                    grid.width,
                    grid.height
                );
            }

            tiles.push(ImageTile {
                image_id: image_ids[i].clone(),
                date: dates[i],
                band: bands.value(i).to_string(),
                path: paths.value(i).to_string(),
                bounds: grid.window_bounds(&window),
                window,
            });
        }

        Ok(())
    }

    /// Find a column by checking multiple possible names.
    fn find_column(schema: &SchemaRef, names: &[&str]) -> Result<usize> {
        for name in names {
            if let Some((idx, _)) = schema.column_with_name(name) {
                return Ok(idx);
            }
        }
        anyhow::bail!(
            "Could not find column with any of these names: {:?}",
            names
        )
    }

    /// Get non-negative integer values from an array (handles signed and unsigned widths).
    ///
    /// Null cells are rejected.
    fn get_usize_array(array: &Arc<dyn Array>) -> Result<Vec<usize>> {
        Self::reject_nulls(array.as_ref())?;

        let values: Vec<i128> = if let Some(arr) = array.as_any().downcast_ref::<Int64Array>() {
            (0..arr.len()).map(|i| arr.value(i) as i128).collect()
        } else if let Some(arr) = array.as_any().downcast_ref::<Int32Array>() {
            (0..arr.len()).map(|i| arr.value(i) as i128).collect()
        } else if let Some(arr) = array.as_any().downcast_ref::<UInt64Array>() {
            (0..arr.len()).map(|i| arr.value(i) as i128).collect()
        } else if let Some(arr) = array.as_any().downcast_ref::<UInt32Array>() {
            (0..arr.len()).map(|i| arr.value(i) as i128).collect()
        } else {
            anyhow::bail!("Expected integer array")
        };

        values
            .into_iter()
            .map(|v| usize::try_from(v).with_context(|| format!("Expected non-negative integer, got {}", v)))
            .collect()
    }

    /// Get dates from a Date32 or `YYYY-MM-DD` string array.
    fn get_date_array(array: &Arc<dyn Array>) -> Result<Vec<NaiveDate>> {
        Self::reject_nulls(array.as_ref())?;

        if let Some(arr) = array.as_any().downcast_ref::<Date32Array>() {
            (0..arr.len())
                .map(|i| arr.value_as_date(i).with_context(|| format!("Invalid date at row {}", i)))
                .collect()
        } else if let Some(arr) = array.as_any().downcast_ref::<StringArray>() {
            (0..arr.len())
                .map(|i| {
                    NaiveDate::parse_from_str(arr.value(i), "%Y-%m-%d")
                        .with_context(|| format!("Invalid date {:?} at row {}", arr.value(i), i))
                })
                .collect()
        } else {
            anyhow::bail!("date column must be Date32 or string")
        }
    }

    /// Get strings from a string array, rejecting null cells.
    fn get_string_array<'a>(array: &'a Arc<dyn Array>, name: &str) -> Result<&'a StringArray> {
        Self::reject_nulls(array.as_ref()).with_context(|| format!("{} column", name))?;
        array
            .as_any()
            .downcast_ref::<StringArray>()
            .with_context(|| format!("{} column must be string", name))
    }

    fn reject_nulls(array: &dyn Array) -> Result<()> {
        if array.null_count() == 0 {
            return Ok(());
        }
        match (0..array.len()).find(|&i| array.is_null(i)) {
            Some(row) => anyhow::bail!("Null value at row {}", row),
            None => Ok(()),
        }
    }

    /// Query tiles that intersect the given bounding box.
    pub fn query_intersecting(&self, bounds: &Bounds) -> Vec<&ImageTile> {
        let envelope = AABB::from_corners(
            [bounds[0], bounds[1]],
            [bounds[2], bounds[3]],
        );
        self.rtree
            .locate_in_envelope_intersecting(&envelope)
            // Drop tiles that only touch the query box along an edge
            .filter(|tile| bounds_intersect(&tile.bounds, bounds))
            .collect()
    }

    /// Tiles of `band` dated within `range`, optionally limited to tiles
    /// intersecting `bounds`.
    ///
    /// Sorted by (date, image_id) so callers can accumulate in a stable order.
    pub fn select(&self, band: &str, range: &DateRange, bounds: Option<&Bounds>) -> Vec<&ImageTile> {
        let candidates: Vec<&ImageTile> = match bounds {
            Some(b) => self.query_intersecting(b),
            None => self.tiles.iter().collect(),
        };

        let mut selected: Vec<&ImageTile> = candidates
            .into_iter()
            .filter(|tile| tile.band == band && range.contains(tile.date))
            .collect();

        selected.sort_by(|a, b| {
            (a.date, &a.image_id, &a.path).cmp(&(b.date, &b.image_id, &b.path))
        });
        selected
    }

    /// Get all tiles.
    pub fn all_tiles(&self) -> &[ImageTile] {
        &self.tiles
    }

    /// Get the number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Check if index is empty.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Get unique band names present in the index.
    pub fn bands(&self) -> Vec<String> {
        let mut bands: Vec<String> = self.tiles.iter().map(|t| t.band.clone()).collect();
        bands.sort();
        bands.dedup();
        bands
    }

    /// Earliest and latest image dates.
    pub fn date_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.tiles.iter().map(|t| t.date).min()?;
        let last = self.tiles.iter().map(|t| t.date).max()?;
        Some((first, last))
    }
}
