//! Zonalis: A Fast, Modular Zonal-Statistics Pipeline for Multi-Temporal
//! Satellite Imagery
//!
//! This library ingests monthly index composites from an object store,
//! merges the tiles covering a parcel geometry, clips them to the parcel
//! and aggregates per-polygon pixel statistics into a queryable temporal
//! series.

pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    CollisionPolicy, Period, PeriodRange, ProductName, StatsRecord, TemporalAggregate,
    ZonalError, ZonalResult,
};

pub use io::{
    load_parcels, AssetLocator, AssetRequest, Fetcher, FsObjectStore, HttpObjectStore,
    ObjectStore, Parcel, ParcelSource, StoreConfig, TileIndex,
};

pub use crate::core::{
    aggregate_monthly, calculate_statistics, clip_to_parcel, MosaicBuilder, OutputFormat,
    Pipeline, PipelineConfig, ReferenceCrs,
};
