//! I/O: raster store access and table export.

mod raster_store;
mod store;
mod table_writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use raster_store::{decode_f32_le, encode_f32_le, RasterSource, RasterStore, GRID_FILE, INDEX_FILE};
pub use store::{create_raster_store, object_path, parse_s3_uri};
pub use table_writer::{to_record_batch, write_table};
