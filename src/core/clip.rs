use crate::core::raster::{read_window_f32, write_raster, RasterMeta};
use crate::io::geometry::Parcel;
use crate::types::{ProductName, ZonalError, ZonalResult};
use gdal::Dataset;
use geo::Contains;
use geo_types::Point;
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Output raster container formats recognized by the clipper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    GeoTiff,
    Jpeg2000,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::GeoTiff => "tif",
            OutputFormat::Jpeg2000 => "jp2",
        }
    }

    pub fn driver(&self) -> &'static str {
        match self {
            OutputFormat::GeoTiff => "GTiff",
            OutputFormat::Jpeg2000 => "JP2OpenJPEG",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "tif" => Some(OutputFormat::GeoTiff),
            "jp2" => Some(OutputFormat::Jpeg2000),
            _ => None,
        }
    }
}

/// Crop a batch of rasters to a parcel geometry.
///
/// For every candidate raster matching the requested format, the parcel is
/// reprojected into the raster's CRS (rasters are never reprojected here),
/// the raster is cropped to the geometry's bounding box, and pixels inside
/// the box but outside the geometry are set to nodata. Rasters the
/// geometry does not intersect are skipped. Output files land in
/// `out_dir`, named after the source with `geometry_id` appended.
///
/// The operation is pure and restartable: the same inputs always produce
/// the same pixel content.
pub fn clip_to_parcel(
    parcel: &Parcel,
    format: OutputFormat,
    image_paths: &[PathBuf],
    geometry_id: &str,
    out_dir: &Path,
) -> ZonalResult<Vec<PathBuf>> {
    let extension = format.extension();
    let valid_files: Vec<&PathBuf> = image_paths
        .iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .collect();
    if valid_files.is_empty() {
        return Err(ZonalError::NotFound(format!(
            "no files found with the .{} format",
            extension
        )));
    }
    std::fs::create_dir_all(out_dir)?;

    let mut cropped = Vec::new();
    for image_path in valid_files {
        match clip_one(parcel, format, image_path, geometry_id, out_dir) {
            Ok(Some(path)) => cropped.push(path),
            Ok(None) => {}
            Err(e) => {
                log::warn!("clipping {} failed: {}", image_path.display(), e);
            }
        }
    }
    Ok(cropped)
}

fn clip_one(
    parcel: &Parcel,
    format: OutputFormat,
    image_path: &Path,
    geometry_id: &str,
    out_dir: &Path,
) -> ZonalResult<Option<PathBuf>> {
    let dataset = Dataset::open(image_path)?;
    let meta = RasterMeta::read(&dataset)?;

    let projected = parcel.to_crs(&meta.crs)?;
    if projected.is_empty() {
        log::info!(
            "parcel geometry is empty for image {}, skipping",
            image_path.display()
        );
        return Ok(None);
    }

    let Some(window) = pixel_window(&meta.geo_transform, meta.width, meta.height, projected.bounds()?)
    else {
        log::info!(
            "parcel does not intersect {}, skipping",
            image_path.display()
        );
        return Ok(None);
    };
    let (col_off, row_off, win_width, win_height) = window;

    let nodata = meta.nodata.unwrap_or(f64::NAN);
    let geometry = projected.geometry();
    let gt = &meta.geo_transform;

    let mut bands: Vec<Array2<f32>> = Vec::with_capacity(meta.band_count);
    for band in 1..=meta.band_count {
        let mut data = read_window_f32(&dataset, band, (col_off, row_off), (win_width, win_height))?;
        for ((row, col), value) in data.indexed_iter_mut() {
            let x = gt[0] + (col_off as f64 + col as f64 + 0.5) * gt[1];
            let y = gt[3] + (row_off as f64 + row as f64 + 0.5) * gt[5];
            if !geometry.contains(&Point::new(x, y)) {
                *value = nodata as f32;
            }
        }
        bands.push(data);
    }

    let out_gt = [
        gt[0] + col_off as f64 * gt[1],
        gt[1],
        gt[2],
        gt[3] + row_off as f64 * gt[5],
        gt[4],
        gt[5],
    ];

    let source_name = image_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("raster.tif");
    let out_name = match ProductName::parse(source_name) {
        Some(name) => name.with_geometry_id(geometry_id).encode(format.extension()),
        None => {
            let stem = image_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("raster");
            format!("{}_{}.{}", stem, geometry_id, format.extension())
        }
    };
    let out_path = out_dir.join(out_name);

    write_raster(
        &out_path,
        format.driver(),
        &bands,
        &out_gt,
        &meta.crs,
        Some(nodata),
    )?;
    log::debug!(
        "clipped {} -> {} ({}x{})",
        image_path.display(),
        out_path.display(),
        win_width,
        win_height
    );
    Ok(Some(out_path))
}

/// Pixel window covering the geometry envelope, clamped to the raster.
/// `None` when the envelope misses the raster entirely.
fn pixel_window(
    gt: &[f64; 6],
    width: usize,
    height: usize,
    bounds: (f64, f64, f64, f64),
) -> Option<(isize, isize, usize, usize)> {
    let (min_x, min_y, max_x, max_y) = bounds;
    // North-up transform: max_y maps to the smallest row.
    let col_start = ((min_x - gt[0]) / gt[1]).floor();
    let col_end = ((max_x - gt[0]) / gt[1]).ceil();
    let row_start = ((max_y - gt[3]) / gt[5]).floor();
    let row_end = ((min_y - gt[3]) / gt[5]).ceil();

    let col_start = col_start.max(0.0) as isize;
    let row_start = row_start.max(0.0) as isize;
    let col_end = (col_end.min(width as f64)) as isize;
    let row_end = (row_end.min(height as f64)) as isize;

    if col_start >= col_end || row_start >= row_end {
        return None;
    }
    Some((
        col_start,
        row_start,
        (col_end - col_start) as usize,
        (row_end - row_start) as usize,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_tokens() {
        assert_eq!(OutputFormat::from_extension("tif"), Some(OutputFormat::GeoTiff));
        assert_eq!(OutputFormat::from_extension("JP2"), Some(OutputFormat::Jpeg2000));
        assert_eq!(OutputFormat::from_extension("png"), None);
        assert_eq!(OutputFormat::GeoTiff.driver(), "GTiff");
        assert_eq!(OutputFormat::Jpeg2000.driver(), "JP2OpenJPEG");
    }

    #[test]
    fn test_pixel_window_inside() {
        // 100x100 raster at origin (0, 100), 1 unit pixels, north-up.
        let gt = [0.0, 1.0, 0.0, 100.0, 0.0, -1.0];
        let window = pixel_window(&gt, 100, 100, (10.2, 79.5, 20.8, 90.5)).unwrap();
        assert_eq!(window, (10, 9, 11, 12));
    }

    #[test]
    fn test_pixel_window_clamped_to_raster() {
        let gt = [0.0, 1.0, 0.0, 100.0, 0.0, -1.0];
        let window = pixel_window(&gt, 100, 100, (-50.0, 90.0, 10.0, 150.0)).unwrap();
        assert_eq!(window, (0, 0, 10, 10));
    }

    #[test]
    fn test_pixel_window_disjoint_is_none() {
        let gt = [0.0, 1.0, 0.0, 100.0, 0.0, -1.0];
        assert!(pixel_window(&gt, 100, 100, (500.0, 500.0, 600.0, 600.0)).is_none());
        assert!(pixel_window(&gt, 100, 100, (-60.0, -60.0, -50.0, -50.0)).is_none());
    }

    #[test]
    fn test_clip_requires_matching_format() {
        let parcel = Parcel::new(
            geo_types::MultiPolygon(vec![geo_types::Polygon::new(
                geo_types::LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
                vec![],
            )]),
            "EPSG:4326",
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = clip_to_parcel(
            &parcel,
            OutputFormat::GeoTiff,
            &[PathBuf::from("image.jp2")],
            "p1",
            dir.path(),
        );
        assert!(matches!(result, Err(ZonalError::NotFound(_))));
    }
}
