//! I/O modules: parcel geometry ingestion, the reference tiling layer,
//! object-store access and concurrent downloads.

pub mod fetcher;
pub mod geometry;
pub mod locator;
pub mod store;
pub mod tiling;

pub use fetcher::{DownloadTask, Fetcher};
pub use geometry::{load_parcels, Parcel, ParcelFeature, ParcelSource};
pub use locator::{AssetCatalog, AssetKey, AssetLocator, AssetRequest, LocatedAsset};
pub use store::{FsObjectStore, HttpObjectStore, ObjectInfo, ObjectStore, StoreConfig};
pub use tiling::{TileIndex, DEFAULT_TILING_LAYER};
