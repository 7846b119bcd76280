use crate::core::raster::{is_nodata, read_band_f32, RasterMeta};
use crate::io::geometry::Parcel;
use crate::types::{CollisionPolicy, ProductName, StatsRecord, ZonalError, ZonalResult};
use gdal::Dataset;
use geo::Contains;
use geo_types::Point;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Zonal statistics for one polygon across a batch of clipped rasters.
#[derive(Debug, Clone)]
pub struct PolygonStats {
    pub polygon_id: String,
    pub records: Vec<StatsRecord>,
}

impl PolygonStats {
    /// Flat key/value view keyed by compact period label:
    /// `{MMYY}_mean`, `{MMYY}_medi`, `{MMYY}_std`.
    pub fn flat_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        for record in &self.records {
            let label = record.period().compact_label();
            map.insert(format!("{}_mean", label), record.mean);
            map.insert(format!("{}_medi", label), record.median);
            map.insert(format!("{}_std", label), record.std_dev);
        }
        map
    }
}

/// Compute mean, median and population standard deviation of the pixels
/// inside a polygon, for every raster in the batch matching the index
/// filter.
///
/// The geometry is reprojected to each raster's CRS; rasters the geometry
/// does not cover and rasters whose masked area is entirely invalid are
/// skipped. The period of each record comes from the raster file name via
/// [`ProductName`]. Two rasters mapping onto the same period are an error
/// under [`CollisionPolicy::Strict`]; [`CollisionPolicy::Replace`]
/// preserves the legacy behavior of keeping the one processed last.
pub fn calculate_statistics(
    parcel: &Parcel,
    image_paths: &[PathBuf],
    polygon_id: &str,
    index: &str,
    policy: CollisionPolicy,
) -> ZonalResult<PolygonStats> {
    let index_token = index.to_uppercase();
    let valid_files: Vec<&PathBuf> = image_paths
        .iter()
        .filter(|p| {
            p.extension().and_then(|e| e.to_str()) == Some("tif")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_uppercase().contains(&index_token))
                    .unwrap_or(false)
        })
        .collect();
    if valid_files.is_empty() {
        return Err(ZonalError::NotFound(
            "no files found with the .tif format".to_string(),
        ));
    }

    let mut stats = PolygonStats {
        polygon_id: polygon_id.to_string(),
        records: Vec::new(),
    };

    for image_path in valid_files {
        let file_name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let Some(product) = ProductName::parse(file_name) else {
            log::warn!(
                "file name '{}' is outside the product grammar, skipping",
                file_name
            );
            continue;
        };

        let dataset = Dataset::open(image_path)?;
        let meta = RasterMeta::read(&dataset)?;

        let projected = match parcel.to_crs(&meta.crs) {
            Ok(p) => p,
            Err(e) => {
                log::warn!(
                    "cannot reproject parcel to CRS of {}: {}",
                    image_path.display(),
                    e
                );
                continue;
            }
        };
        if projected.is_empty() {
            log::info!(
                "parcel geometry is empty for image {}, skipping",
                image_path.display()
            );
            continue;
        }

        let masked = soft_mask(&dataset, &meta, &projected)?;
        let values: Vec<f32> = masked
            .iter()
            .flat_map(|band| band.iter().copied())
            .filter(|v| !v.is_nan())
            .collect();
        if values.is_empty() {
            log::info!(
                "no data found in masked area for image {}, skipping",
                image_path.display()
            );
            continue;
        }

        let (mean, median, std_dev) = summarize(&values);
        let record = StatsRecord {
            polygon_id: polygon_id.to_string(),
            index: index_token.clone(),
            year: product.period.year,
            month: product.period.month,
            mean,
            median,
            std_dev,
        };
        insert_record(&mut stats.records, record, policy, image_path)?;
    }

    Ok(stats)
}

/// Mask a raster against a geometry without cropping: the output keeps the
/// raster's dimensions and positional metadata, with out-of-geometry and
/// nodata pixels set to NaN.
fn soft_mask(
    dataset: &Dataset,
    meta: &RasterMeta,
    parcel: &Parcel,
) -> ZonalResult<Vec<Array2<f32>>> {
    let geometry = parcel.geometry();
    let gt = &meta.geo_transform;

    let mut inside = Array2::<bool>::from_elem((meta.height, meta.width), false);
    for ((row, col), flag) in inside.indexed_iter_mut() {
        let x = gt[0] + (col as f64 + 0.5) * gt[1];
        let y = gt[3] + (row as f64 + 0.5) * gt[5];
        *flag = geometry.contains(&Point::new(x, y));
    }

    let mut bands = Vec::with_capacity(meta.band_count);
    for band in 1..=meta.band_count {
        let mut data = read_band_f32(dataset, band)?;
        for ((row, col), value) in data.indexed_iter_mut() {
            if !inside[[row, col]] || is_nodata(*value, meta.nodata) {
                *value = f32::NAN;
            }
        }
        bands.push(data);
    }
    Ok(bands)
}

/// NaN-free mean, median and population standard deviation.
fn summarize(values: &[f32]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;

    let mut sorted: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    let variance = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    (mean, median, variance.sqrt())
}

fn insert_record(
    records: &mut Vec<StatsRecord>,
    record: StatsRecord,
    policy: CollisionPolicy,
    source: &Path,
) -> ZonalResult<()> {
    let collision = records
        .iter()
        .position(|r| r.year == record.year && r.month == record.month);
    match (collision, policy) {
        (Some(_), CollisionPolicy::Strict) => Err(ZonalError::Processing(format!(
            "raster {} maps onto period {}-{:02} which already has a record; \
             use CollisionPolicy::Replace to keep the last raster instead",
            source.display(),
            record.year,
            record.month
        ))),
        (Some(i), CollisionPolicy::Replace) => {
            log::warn!(
                "replacing statistics for period {}-{:02} with raster {}",
                record.year,
                record.month,
                source.display()
            );
            records[i] = record;
            Ok(())
        }
        (None, _) => {
            records.push(record);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(year: i32, month: u32, mean: f64) -> StatsRecord {
        StatsRecord {
            polygon_id: "p1".to_string(),
            index: "NDVI".to_string(),
            year,
            month,
            mean,
            median: mean,
            std_dev: 0.0,
        }
    }

    #[test]
    fn test_summarize_odd_count() {
        let (mean, median, std) = summarize(&[1.0, 2.0, 6.0]);
        assert_relative_eq!(mean, 3.0, epsilon = 1e-12);
        assert_relative_eq!(median, 2.0, epsilon = 1e-12);
        // Population std of {1, 2, 6}: sqrt(14/3).
        assert_relative_eq!(std, (14.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_summarize_even_count() {
        let (_, median, _) = summarize(&[1.0, 2.0, 3.0, 10.0]);
        assert_relative_eq!(median, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_insert_record_strict_rejects_collision() {
        let mut records = vec![record(2020, 3, 0.5)];
        let result = insert_record(
            &mut records,
            record(2020, 3, 0.7),
            CollisionPolicy::Strict,
            Path::new("NDVI_2020_03.tif"),
        );
        assert!(matches!(result, Err(ZonalError::Processing(_))));
        assert_relative_eq!(records[0].mean, 0.5);
    }

    #[test]
    fn test_insert_record_replace_keeps_last() {
        let mut records = vec![record(2020, 3, 0.5)];
        insert_record(
            &mut records,
            record(2020, 3, 0.7),
            CollisionPolicy::Replace,
            Path::new("NDVI_2020_03.tif"),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_relative_eq!(records[0].mean, 0.7);
    }

    #[test]
    fn test_flat_map_keys() {
        let stats = PolygonStats {
            polygon_id: "p1".to_string(),
            records: vec![record(2020, 3, 0.5)],
        };
        let map = stats.flat_map();
        assert!(map.contains_key("0320_mean"));
        assert!(map.contains_key("0320_medi"));
        assert!(map.contains_key("0320_std"));
    }

    #[test]
    fn test_statistics_requires_matching_files() {
        let parcel = Parcel::new(
            geo_types::MultiPolygon(vec![geo_types::Polygon::new(
                geo_types::LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
                vec![],
            )]),
            "EPSG:4326",
        )
        .unwrap();
        let result = calculate_statistics(
            &parcel,
            &[PathBuf::from("NDWI_2020_03_p1.tif")],
            "p1",
            "NDVI",
            CollisionPolicy::Strict,
        );
        assert!(matches!(result, Err(ZonalError::NotFound(_))));
    }
}
