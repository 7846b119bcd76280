//! Core raster processing: mosaicking, clipping, zonal statistics,
//! temporal aggregation and the end-to-end pipeline.

pub mod clip;
pub mod mosaic;
pub mod pipeline;
pub mod raster;
pub mod stats;
pub mod temporal;

// Re-export main types
pub use clip::{clip_to_parcel, OutputFormat};
pub use mosaic::{reproject_raster, MosaicBuilder, ReferenceCrs};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutput};
pub use raster::RasterMeta;
pub use stats::{calculate_statistics, PolygonStats};
pub use temporal::aggregate_monthly;
