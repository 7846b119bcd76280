use crate::types::{ZonalError, ZonalResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::BoundingRect;
use geo_types::{Coord, Geometry as GeoGeometry, LineString, MultiPolygon, Polygon};
use geojson::GeoJson;
use std::path::{Path, PathBuf};

/// A parcel polygon (or multi-polygon) with an attached coordinate
/// reference system.
///
/// Immutable: reprojection returns a new `Parcel`. The CRS is carried as an
/// authority string (`EPSG:4326`) or WKT so the value stays cheap to clone
/// and safe to move across threads.
#[derive(Debug, Clone)]
pub struct Parcel {
    geometry: MultiPolygon<f64>,
    crs: String,
}

impl Parcel {
    pub fn new(geometry: MultiPolygon<f64>, crs: &str) -> ZonalResult<Self> {
        if geometry.0.is_empty() {
            return Err(ZonalError::InvalidInput(
                "parcel geometry contains no polygons".to_string(),
            ));
        }
        Ok(Parcel {
            geometry,
            crs: crs.to_string(),
        })
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty() || self.geometry.bounding_rect().is_none()
    }

    /// Geometry envelope as (min_x, min_y, max_x, max_y) in the parcel CRS.
    pub fn bounds(&self) -> ZonalResult<(f64, f64, f64, f64)> {
        let rect = self
            .geometry
            .bounding_rect()
            .ok_or_else(|| ZonalError::InvalidInput("parcel geometry is empty".to_string()))?;
        Ok((rect.min().x, rect.min().y, rect.max().x, rect.max().y))
    }

    /// Reproject into the target CRS, returning a new parcel. The source
    /// parcel is never modified.
    pub fn to_crs(&self, target_crs: &str) -> ZonalResult<Parcel> {
        if same_crs(&self.crs, target_crs)? {
            return Ok(self.clone());
        }
        let src = spatial_ref_from(&self.crs)?;
        let dst = spatial_ref_from(target_crs)?;
        let transform = CoordTransform::new(&src, &dst)?;

        let polygons = self
            .geometry
            .0
            .iter()
            .map(|poly| transform_polygon(poly, &transform))
            .collect::<ZonalResult<Vec<Polygon<f64>>>>()?;

        Ok(Parcel {
            geometry: MultiPolygon(polygons),
            crs: target_crs.to_string(),
        })
    }
}

fn transform_polygon(poly: &Polygon<f64>, transform: &CoordTransform) -> ZonalResult<Polygon<f64>> {
    let exterior = transform_ring(poly.exterior(), transform)?;
    let interiors = poly
        .interiors()
        .iter()
        .map(|ring| transform_ring(ring, transform))
        .collect::<ZonalResult<Vec<LineString<f64>>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn transform_ring(ring: &LineString<f64>, transform: &CoordTransform) -> ZonalResult<LineString<f64>> {
    let mut xs: Vec<f64> = ring.coords().map(|c| c.x).collect();
    let mut ys: Vec<f64> = ring.coords().map(|c| c.y).collect();
    transform.transform_coords(&mut xs, &mut ys, &mut [])?;
    Ok(LineString::from(
        xs.into_iter()
            .zip(ys)
            .map(|(x, y)| Coord { x, y })
            .collect::<Vec<Coord<f64>>>(),
    ))
}

/// Build a GDAL spatial reference from an `EPSG:<code>` authority string or
/// raw WKT, forcing traditional (x=lon, y=lat) axis order so coordinate
/// arrays can be passed through transforms without axis swaps.
pub fn spatial_ref_from(crs: &str) -> ZonalResult<SpatialRef> {
    let mut srs = if let Some(code) = crs.strip_prefix("EPSG:").or_else(|| crs.strip_prefix("epsg:")) {
        let code: u32 = code.trim().parse().map_err(|_| {
            ZonalError::InvalidInput(format!("invalid EPSG code in CRS string '{}'", crs))
        })?;
        SpatialRef::from_epsg(code)?
    } else {
        SpatialRef::from_wkt(crs)?
    };
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

/// Canonical CRS string for a spatial reference: the EPSG authority code
/// when one is known, otherwise WKT.
pub fn crs_string(srs: &SpatialRef) -> ZonalResult<String> {
    if let Ok(code) = srs.auth_code() {
        return Ok(format!("EPSG:{}", code));
    }
    Ok(srs.to_wkt()?)
}

/// Whether two CRS strings refer to the same system.
pub fn same_crs(a: &str, b: &str) -> ZonalResult<bool> {
    if a == b {
        return Ok(true);
    }
    let sa = spatial_ref_from(a)?;
    let sb = spatial_ref_from(b)?;
    match (sa.auth_code(), sb.auth_code()) {
        (Ok(ca), Ok(cb)) => Ok(ca == cb),
        _ => Ok(sa.to_wkt()? == sb.to_wkt()?),
    }
}

/// Convert a GDAL vector geometry into geo-types via its GeoJSON rendering.
/// The round-trip drops z-coordinates, which is exactly what the reference
/// tiling layer's 3D polygons need.
pub(crate) fn gdal_geometry_to_geo(
    geometry: &gdal::vector::Geometry,
) -> ZonalResult<GeoGeometry<f64>> {
    let json = geometry.json()?;
    let parsed: geojson::Geometry = serde_json::from_str(&json)
        .map_err(|e| ZonalError::Processing(format!("unreadable geometry JSON: {}", e)))?;
    GeoGeometry::try_from(parsed.value)
        .map_err(|e| ZonalError::Processing(format!("unsupported geometry: {}", e)))
}

/// Extract the polygon members of a geometry, recursing into collections.
/// Non-polygon members are discarded.
pub fn collect_polygons(geometry: GeoGeometry<f64>) -> Vec<Polygon<f64>> {
    match geometry {
        GeoGeometry::Polygon(p) => vec![p],
        GeoGeometry::MultiPolygon(mp) => mp.0,
        GeoGeometry::GeometryCollection(gc) => {
            gc.0.into_iter().flat_map(collect_polygons).collect()
        }
        GeoGeometry::Rect(r) => vec![r.to_polygon()],
        _ => Vec::new(),
    }
}

/// Caller-supplied parcel geometry, one of the four accepted shapes.
/// Everything is normalized into [`ParcelFeature`]s before entering the
/// pipeline core.
#[derive(Debug, Clone)]
pub enum ParcelSource {
    /// A raw GeoJSON-style geometry object, optionally carrying a `CRS`
    /// member with an authority string.
    Raw(serde_json::Value),
    /// A GeoJSON document (FeatureCollection, Feature or bare geometry).
    GeoJsonFile(PathBuf),
    /// A zipped shapefile bundle (.shp/.dbf/.shx/.prj).
    ShapefileZip(PathBuf),
    /// A CSV of coordinate pairs forming a polygon ring.
    CsvPoints {
        path: PathBuf,
        latitude_column: String,
        longitude_column: String,
    },
}

/// A normalized parcel with its identifier and the original feature
/// properties, kept so output GeoJSON can echo them back.
#[derive(Debug, Clone)]
pub struct ParcelFeature {
    pub parcel: Parcel,
    pub polygon_id: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub geometry_json: serde_json::Value,
}

/// Normalize a parcel source into features. `fallback_id` seeds polygon
/// identifiers for sources that do not carry their own.
pub fn load_parcels(source: &ParcelSource, fallback_id: &str) -> ZonalResult<Vec<ParcelFeature>> {
    match source {
        ParcelSource::Raw(value) => parcels_from_raw(value, fallback_id),
        ParcelSource::GeoJsonFile(path) => parcels_from_geojson(path, fallback_id),
        ParcelSource::ShapefileZip(path) => parcels_from_shapefile_zip(path),
        ParcelSource::CsvPoints {
            path,
            latitude_column,
            longitude_column,
        } => parcels_from_csv(path, latitude_column, longitude_column, fallback_id),
    }
}

fn parcels_from_raw(value: &serde_json::Value, fallback_id: &str) -> ZonalResult<Vec<ParcelFeature>> {
    if value.get("coordinates").is_none() {
        return Err(ZonalError::InvalidInput(
            "invalid parcel geometry dictionary: 'coordinates' key missing".to_string(),
        ));
    }
    let crs = value
        .get("CRS")
        .and_then(|v| v.as_str())
        .unwrap_or("EPSG:4326")
        .to_string();

    let geometry: geojson::Geometry = serde_json::from_value(value.clone())
        .map_err(|e| ZonalError::InvalidInput(format!("invalid geometry dictionary: {}", e)))?;
    let geo_geometry = GeoGeometry::try_from(geometry.value.clone())
        .map_err(|e| ZonalError::InvalidInput(format!("unsupported geometry type: {}", e)))?;
    let polygons = collect_polygons(geo_geometry);
    let parcel = Parcel::new(MultiPolygon(polygons), &crs)?;

    Ok(vec![ParcelFeature {
        parcel,
        polygon_id: fallback_id.to_string(),
        properties: serde_json::Map::new(),
        geometry_json: value.clone(),
    }])
}

fn parcels_from_geojson(path: &Path, fallback_id: &str) -> ZonalResult<Vec<ParcelFeature>> {
    let raw = std::fs::read_to_string(path)?;
    let document: GeoJson = raw
        .parse()
        .map_err(|e| ZonalError::InvalidInput(format!("invalid GeoJSON document: {}", e)))?;

    let features = match document {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![geojson::Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    };

    let mut parcels = Vec::new();
    for (i, feature) in features.into_iter().enumerate() {
        let geometry = feature.geometry.ok_or_else(|| {
            ZonalError::InvalidInput(format!("GeoJSON feature {} has no geometry", i))
        })?;
        let geo_geometry = GeoGeometry::try_from(geometry.value.clone())
            .map_err(|e| ZonalError::InvalidInput(format!("unsupported geometry type: {}", e)))?;
        let polygons = collect_polygons(geo_geometry);
        if polygons.is_empty() {
            log::warn!("GeoJSON feature {} has no polygon members, skipping", i);
            continue;
        }
        let polygon_id = if i == 0 {
            fallback_id.to_string()
        } else {
            format!("{}_{}", fallback_id, i)
        };
        parcels.push(ParcelFeature {
            parcel: Parcel::new(MultiPolygon(polygons), "EPSG:4326")?,
            polygon_id,
            properties: feature.properties.unwrap_or_default(),
            geometry_json: serde_json::to_value(&geometry)
                .map_err(|e| ZonalError::Processing(format!("geometry serialization: {}", e)))?,
        });
    }

    if parcels.is_empty() {
        return Err(ZonalError::InvalidInput(
            "GeoJSON document contains no polygon features".to_string(),
        ));
    }
    Ok(parcels)
}

fn parcels_from_shapefile_zip(zip_path: &Path) -> ZonalResult<Vec<ParcelFeature>> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ZonalError::InvalidInput(format!("unreadable shapefile ZIP: {}", e)))?;

    let extract_dir = tempfile::tempdir()?;
    archive
        .extract(extract_dir.path())
        .map_err(|e| ZonalError::InvalidInput(format!("failed to extract shapefile ZIP: {}", e)))?;

    let mut shp_file = None;
    let mut dbf_file = None;
    for entry in std::fs::read_dir(extract_dir.path())? {
        let path = entry?.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("shp") => shp_file = Some(path),
            Some("dbf") => dbf_file = Some(path),
            _ => {}
        }
    }
    let shp_file = shp_file.ok_or_else(|| {
        ZonalError::InvalidInput("no .shp file found in ZIP".to_string())
    })?;
    if dbf_file.is_none() {
        return Err(ZonalError::InvalidInput(
            "no .dbf file found in ZIP".to_string(),
        ));
    }

    let dataset = Dataset::open(&shp_file)?;
    let mut layer = dataset.layer(0)?;
    let crs = match layer.spatial_ref() {
        Some(srs) => crs_string(&srs)?,
        None => "EPSG:4326".to_string(),
    };
    let id_field = layer.defn().fields().next().map(|f| f.name());

    let mut parcels = Vec::new();
    for (i, feature) in layer.features().enumerate() {
        let Some(geometry) = feature.geometry() else {
            continue;
        };
        let polygons = collect_polygons(gdal_geometry_to_geo(geometry)?);
        if polygons.is_empty() {
            continue;
        }
        let polygon_id = id_field
            .as_deref()
            .and_then(|name| feature.field(name).ok().flatten())
            .and_then(field_value_to_string)
            .unwrap_or_else(|| format!("feature_{}", i));

        let geometry_json: serde_json::Value = serde_json::from_str(&geometry.json()?)
            .map_err(|e| ZonalError::Processing(format!("geometry serialization: {}", e)))?;
        parcels.push(ParcelFeature {
            parcel: Parcel::new(MultiPolygon(polygons), &crs)?,
            polygon_id,
            properties: serde_json::Map::new(),
            geometry_json,
        });
    }

    if parcels.is_empty() {
        return Err(ZonalError::InvalidInput(
            "shapefile contains no polygon features".to_string(),
        ));
    }
    Ok(parcels)
}

fn field_value_to_string(value: gdal::vector::FieldValue) -> Option<String> {
    use gdal::vector::FieldValue;
    match value {
        FieldValue::StringValue(s) => Some(s),
        FieldValue::IntegerValue(v) => Some(v.to_string()),
        FieldValue::Integer64Value(v) => Some(v.to_string()),
        FieldValue::RealValue(v) => Some(v.to_string()),
        _ => None,
    }
}

fn parcels_from_csv(
    path: &Path,
    latitude_column: &str,
    longitude_column: &str,
    fallback_id: &str,
) -> ZonalResult<Vec<ParcelFeature>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| ZonalError::InvalidInput(format!("unreadable CSV file: {}", e)))?;
    let headers = reader
        .headers()
        .map_err(|e| ZonalError::InvalidInput(format!("unreadable CSV header: {}", e)))?
        .clone();

    let lat_idx = headers.iter().position(|h| h == latitude_column);
    let lon_idx = headers.iter().position(|h| h == longitude_column);
    let (lat_idx, lon_idx) = match (lat_idx, lon_idx) {
        (Some(la), Some(lo)) => (la, lo),
        (None, Some(_)) => {
            return Err(ZonalError::InvalidInput(format!(
                "latitude column '{}' not found in CSV header",
                latitude_column
            )))
        }
        (Some(_), None) => {
            return Err(ZonalError::InvalidInput(format!(
                "longitude column '{}' not found in CSV header",
                longitude_column
            )))
        }
        (None, None) => {
            return Err(ZonalError::InvalidInput(
                "latitude and longitude column names not found in CSV header".to_string(),
            ))
        }
    };

    let mut coords: Vec<Coord<f64>> = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| ZonalError::InvalidInput(format!("unreadable CSV row: {}", e)))?;
        let lat: f64 = record
            .get(lat_idx)
            .unwrap_or("")
            .trim()
            .parse()
            .map_err(|_| ZonalError::InvalidInput("non-numeric latitude value in CSV".to_string()))?;
        let lon: f64 = record
            .get(lon_idx)
            .unwrap_or("")
            .trim()
            .parse()
            .map_err(|_| {
                ZonalError::InvalidInput("non-numeric longitude value in CSV".to_string())
            })?;
        coords.push(Coord { x: lon, y: lat });
    }

    if coords.len() < 3 {
        return Err(ZonalError::InvalidInput(
            "CSV must contain at least three coordinate points".to_string(),
        ));
    }
    // Close the ring.
    coords.push(coords[0]);

    let polygon = Polygon::new(LineString::from(coords.clone()), vec![]);
    let geometry_json =
        serde_json::to_value(geojson::Geometry::new(geojson::Value::from(&polygon)))
            .map_err(|e| ZonalError::Processing(format!("geometry serialization: {}", e)))?;

    Ok(vec![ParcelFeature {
        parcel: Parcel::new(MultiPolygon(vec![polygon]), "EPSG:4326")?,
        polygon_id: fallback_id.to_string(),
        properties: serde_json::Map::new(),
        geometry_json,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn square(min: f64, max: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (min, min),
                (max, min),
                (max, max),
                (min, max),
                (min, min),
            ]),
            vec![],
        )
    }

    #[test]
    fn test_parcel_rejects_empty_geometry() {
        assert!(Parcel::new(MultiPolygon(vec![]), "EPSG:4326").is_err());
    }

    #[test]
    fn test_to_crs_same_crs_is_identity() {
        let parcel = Parcel::new(MultiPolygon(vec![square(0.0, 1.0)]), "EPSG:4326").unwrap();
        let other = parcel.to_crs("EPSG:4326").unwrap();
        assert_eq!(parcel.geometry(), other.geometry());
    }

    #[test]
    fn test_to_crs_produces_new_value() {
        let parcel = Parcel::new(MultiPolygon(vec![square(-5.3, -5.2)]), "EPSG:4326").unwrap();
        let projected = parcel.to_crs("EPSG:32630").unwrap();
        assert_eq!(parcel.crs(), "EPSG:4326");
        assert_eq!(projected.crs(), "EPSG:32630");
        // UTM zone 30N coordinates are in the hundreds of kilometers.
        let (min_x, _, _, _) = projected.bounds().unwrap();
        assert!(min_x > 10_000.0);
    }

    #[test]
    fn test_collect_polygons_filters_collections() {
        let collection = GeoGeometry::GeometryCollection(geo_types::GeometryCollection(vec![
            GeoGeometry::Polygon(square(0.0, 1.0)),
            GeoGeometry::Point(geo_types::Point::new(0.0, 0.0)),
            GeoGeometry::Polygon(square(2.0, 3.0)),
        ]));
        assert_eq!(collect_polygons(collection).len(), 2);
    }

    #[test]
    fn test_raw_geometry_requires_coordinates() {
        let value = serde_json::json!({ "type": "Polygon" });
        assert!(matches!(
            parcels_from_raw(&value, "p1"),
            Err(ZonalError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_raw_geometry_parses_polygon() {
        let value = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
        });
        let parcels = parcels_from_raw(&value, "p1").unwrap();
        assert_eq!(parcels.len(), 1);
        assert_eq!(parcels[0].polygon_id, "p1");
        assert_eq!(parcels[0].parcel.crs(), "EPSG:4326");
    }

    #[test]
    fn test_csv_requires_three_points() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "X,Y").unwrap();
        writeln!(file, "37.66,-5.30").unwrap();
        writeln!(file, "37.67,-5.22").unwrap();
        let result = parcels_from_csv(file.path(), "X", "Y", "p1");
        assert!(matches!(result, Err(ZonalError::InvalidInput(_))));
    }

    #[test]
    fn test_csv_closes_ring() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "X,Y").unwrap();
        writeln!(file, "37.66,-5.30").unwrap();
        writeln!(file, "37.67,-5.22").unwrap();
        writeln!(file, "37.73,-5.25").unwrap();
        let parcels = parcels_from_csv(file.path(), "X", "Y", "p1").unwrap();
        let ring = parcels[0].parcel.geometry().0[0].exterior();
        assert_eq!(ring.0.first(), ring.0.last());
        assert_eq!(ring.0.len(), 4);
    }

    #[test]
    fn test_csv_reports_missing_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lat,lon").unwrap();
        writeln!(file, "37.66,-5.30").unwrap();
        let result = parcels_from_csv(file.path(), "X", "Y", "p1");
        assert!(matches!(result, Err(ZonalError::InvalidInput(_))));
    }
}
