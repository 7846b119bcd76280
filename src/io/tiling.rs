use crate::io::geometry::{collect_polygons, crs_string, gdal_geometry_to_geo, Parcel};
use crate::types::{ZonalError, ZonalResult};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::Intersects;
use geo_types::MultiPolygon;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

/// Default reference tiling layer: the Sentinel-2 MGRS tile footprints
/// published by ESA.
pub const DEFAULT_TILING_LAYER: &str =
    "S2A_OPER_GIP_TILPAR_MPC__20151209T095117_V20150622T000000_21000101T000000_B00.kml";

/// Footprint of a single reference tile.
#[derive(Debug, Clone)]
pub struct TileFootprint {
    pub name: String,
    pub footprint: MultiPolygon<f64>,
}

/// The reference tiling layer: UTM/MGRS tile names with their footprint
/// polygons. Loaded once, read-only afterwards.
#[derive(Debug)]
pub struct TileIndex {
    tiles: Vec<TileFootprint>,
    crs: String,
}

static SHARED_INDEX: OnceLock<TileIndex> = OnceLock::new();

impl TileIndex {
    /// Load the reference layer from any GDAL-readable vector file
    /// (KML, GeoJSON, shapefile). Failure is a configuration error: the
    /// layer is required reference data, not user input.
    pub fn load<P: AsRef<Path>>(path: P) -> ZonalResult<Self> {
        let path = path.as_ref();
        log::info!("Loading reference tiling layer from {}", path.display());

        let dataset = Dataset::open(path).map_err(|e| {
            ZonalError::Configuration(format!(
                "cannot open reference tiling layer {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut layer = dataset.layer(0).map_err(|e| {
            ZonalError::Configuration(format!("reference tiling layer has no layers: {}", e))
        })?;

        let crs = match layer.spatial_ref() {
            Some(srs) => crs_string(&srs)?,
            None => "EPSG:4326".to_string(),
        };

        let mut tiles = Vec::new();
        for feature in layer.features() {
            let Some(name) = feature
                .field("Name")
                .ok()
                .flatten()
                .and_then(|v| v.into_string())
            else {
                continue;
            };
            let Some(geometry) = feature.geometry() else {
                continue;
            };
            // KML footprints arrive as 3D geometry collections; keep the
            // polygon members, projected to 2D.
            let polygons = match gdal_geometry_to_geo(geometry) {
                Ok(geo) => collect_polygons(geo),
                Err(e) => {
                    log::debug!("skipping tile '{}' with unreadable geometry: {}", name, e);
                    continue;
                }
            };
            if polygons.is_empty() {
                continue;
            }
            tiles.push(TileFootprint {
                name,
                footprint: MultiPolygon(polygons),
            });
        }

        if tiles.is_empty() {
            return Err(ZonalError::Configuration(format!(
                "reference tiling layer {} contains no named tile polygons",
                path.display()
            )));
        }

        log::info!("Loaded {} reference tile footprints ({})", tiles.len(), crs);
        Ok(TileIndex { tiles, crs })
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Names of all reference tiles whose footprint spatially intersects
    /// the parcel. The parcel is reprojected into the layer CRS when they
    /// differ. Order-free set semantics.
    pub fn zones_for(&self, parcel: &Parcel) -> ZonalResult<BTreeSet<String>> {
        let parcel = parcel.to_crs(&self.crs)?;
        if parcel.is_empty() {
            return Err(ZonalError::InvalidInput(
                "parcel geometry became empty after reprojection".to_string(),
            ));
        }

        let zones: BTreeSet<String> = self
            .tiles
            .iter()
            .filter(|tile| tile.footprint.intersects(parcel.geometry()))
            .map(|tile| tile.name.clone())
            .collect();

        log::debug!("parcel intersects {} reference tiles", zones.len());
        Ok(zones)
    }
}

/// Process-wide lazily loaded reference layer. Safe for concurrent reads
/// once loaded; load errors are not cached.
pub fn shared_index<P: AsRef<Path>>(path: P) -> ZonalResult<&'static TileIndex> {
    if let Some(index) = SHARED_INDEX.get() {
        return Ok(index);
    }
    let index = TileIndex::load(path)?;
    Ok(SHARED_INDEX.get_or_init(|| index))
}
