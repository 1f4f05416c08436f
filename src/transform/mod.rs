//! Data transformation: temporal reduction and zonal aggregation.

mod temporal;
mod zonal;

pub use temporal::{reduce_stack, RasterSnapshot, TemporalAccumulator, TemporalReducer};
pub use zonal::{OutsideFootprint, SpatialReducer, ZonalAggregator};
