//! Regions, raster grids and image indexes.

mod image_index;
mod raster_grid;
mod region_table;

pub use image_index::{DateRange, ImageIndex, ImageTile};
pub use raster_grid::{bounds_intersect, expand_bounds, Bounds, PixelWindow, RasterGrid};
pub use region_table::{Region, RegionTable};
