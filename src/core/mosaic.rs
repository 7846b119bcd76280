use crate::core::raster::{geo_to_pixel, pixel_to_geo, read_band_f32, write_raster, RasterMeta};
use crate::io::geometry::{same_crs, spatial_ref_from};
use crate::types::{ZonalError, ZonalResult};
use gdal::spatial_ref::CoordTransform;
use gdal::Dataset;
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Suffix given to reprojected working copies so reruns do not pick them
/// up as fresh inputs.
const REPROJECTED_SUFFIX: &str = "_reprojected";

/// Explicit choice of the reference CRS for a merge. The selection is a
/// parameter, never an accident of file listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceCrs {
    /// Use the CRS of the lexicographically first input raster. Suited to
    /// same-zone merges where all inputs share one UTM zone.
    FirstInput,
    /// Use a fixed target CRS. Cross-zone merges spanning UTM zones use
    /// geographic coordinates, e.g. `Epsg(4326)`.
    Epsg(u32),
}

/// Merges a folder of same-period, same-band rasters into one mosaic.
pub struct MosaicBuilder {
    reference: ReferenceCrs,
}

impl MosaicBuilder {
    pub fn new(reference: ReferenceCrs) -> Self {
        MosaicBuilder { reference }
    }

    /// Merge every `.tif` in `folder` into `output`.
    ///
    /// Inputs are taken in lexicographic order and merged with a "last"
    /// overlap policy: where several rasters cover the same output pixel,
    /// the raster processed last wins. Inputs that fail to reproject are
    /// skipped; if none survive, the merge fails without writing output.
    pub fn merge_folder(&self, folder: &Path, output: &Path) -> ZonalResult<PathBuf> {
        let inputs = list_tif_files(folder, output)?;
        if inputs.is_empty() {
            return Err(ZonalError::NotFound(format!(
                "no .tif files found in {}",
                folder.display()
            )));
        }
        log::info!(
            "merging {} rasters from {} into {}",
            inputs.len(),
            folder.display(),
            output.display()
        );

        let target_crs = match self.reference {
            ReferenceCrs::Epsg(code) => format!("EPSG:{}", code),
            ReferenceCrs::FirstInput => {
                let dataset = Dataset::open(&inputs[0])?;
                RasterMeta::read(&dataset)?.crs
            }
        };

        let mut prepared = Vec::new();
        for input in &inputs {
            match prepare_input(input, &target_crs) {
                Ok(path) => prepared.push(path),
                Err(e) => {
                    log::warn!("skipping {}: {}", input.display(), e);
                }
            }
        }
        if prepared.is_empty() {
            return Err(ZonalError::Processing(format!(
                "no rasters in {} could be reprojected to {}",
                folder.display(),
                target_crs
            )));
        }

        merge_files(&prepared, output, &target_crs)?;
        log::info!("mosaic written to {}", output.display());
        Ok(output.to_path_buf())
    }
}

fn list_tif_files(folder: &Path, output: &Path) -> ZonalResult<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(ZonalError::NotFound(format!(
            "{} is not a directory",
            folder.display()
        )));
    }
    let output_name = output.file_name();
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|e| e.to_str()) == Some("tif")
                && path.file_name() != output_name
                && !path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.ends_with(REPROJECTED_SUFFIX))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Return a path to the input expressed in the target CRS: the original
/// when it already matches, otherwise a reprojected working copy.
fn prepare_input(input: &Path, target_crs: &str) -> ZonalResult<PathBuf> {
    let dataset = Dataset::open(input)?;
    let meta = RasterMeta::read(&dataset)?;
    drop(dataset);

    if same_crs(&meta.crs, target_crs)? {
        return Ok(input.to_path_buf());
    }

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("raster");
    let reprojected = input.with_file_name(format!("{}{}.tif", stem, REPROJECTED_SUFFIX));
    reproject_raster(input, &reprojected, target_crs)?;
    Ok(reprojected)
}

/// Reproject a raster into the target CRS with nearest-neighbor
/// resampling. Index and classification rasters must not be blended, so
/// no interpolating resampler is ever used.
pub fn reproject_raster(src_path: &Path, dst_path: &Path, target_crs: &str) -> ZonalResult<()> {
    let dataset = Dataset::open(src_path)?;
    let meta = RasterMeta::read(&dataset)?;

    if same_crs(&meta.crs, target_crs)? {
        std::fs::copy(src_path, dst_path)?;
        return Ok(());
    }
    log::debug!(
        "reprojecting {} from {} to {}",
        src_path.display(),
        meta.crs,
        target_crs
    );

    let src_srs = spatial_ref_from(&meta.crs)?;
    let dst_srs = spatial_ref_from(target_crs)?;

    // Default output grid: transform a densified boundary of the source
    // extent and take its envelope, keeping roughly the source pixel
    // count along each axis.
    let forward = CoordTransform::new(&src_srs, &dst_srs)?;
    let (min_x, min_y, max_x, max_y) = transformed_bounds(&meta, &forward)?;
    let env_width = max_x - min_x;
    let env_height = max_y - min_y;
    if env_width <= 0.0 || env_height <= 0.0 {
        return Err(ZonalError::Processing(format!(
            "degenerate reprojected extent for {}",
            src_path.display()
        )));
    }
    let resolution = (env_width / meta.width as f64).max(env_height / meta.height as f64);
    let dst_width = (env_width / resolution).ceil().max(1.0) as usize;
    let dst_height = (env_height / resolution).ceil().max(1.0) as usize;
    let dst_gt = [min_x, resolution, 0.0, max_y, 0.0, -resolution];

    let fill = meta.nodata.map(|v| v as f32).unwrap_or(f32::NAN);
    let src_bands: Vec<Array2<f32>> = (1..=meta.band_count)
        .map(|b| read_band_f32(&dataset, b))
        .collect::<ZonalResult<Vec<_>>>()?;

    let inverse = CoordTransform::new(&dst_srs, &src_srs)?;
    let mut dst_bands: Vec<Array2<f32>> =
        vec![Array2::from_elem((dst_height, dst_width), fill); meta.band_count];

    let mut xs = vec![0.0f64; dst_width];
    let mut ys = vec![0.0f64; dst_width];
    for row in 0..dst_height {
        for col in 0..dst_width {
            let (x, y) = pixel_to_geo(&dst_gt, col as f64 + 0.5, row as f64 + 0.5);
            xs[col] = x;
            ys[col] = y;
        }
        if inverse.transform_coords(&mut xs, &mut ys, &mut []).is_err() {
            // Row lies outside the transform's domain; leave it filled.
            continue;
        }
        for col in 0..dst_width {
            let (src_col, src_row) = geo_to_pixel(&meta.geo_transform, xs[col], ys[col]);
            let (src_col, src_row) = (src_col.floor(), src_row.floor());
            if src_col < 0.0
                || src_row < 0.0
                || src_col >= meta.width as f64
                || src_row >= meta.height as f64
            {
                continue;
            }
            let (sr, sc) = (src_row as usize, src_col as usize);
            for (band, dst) in src_bands.iter().zip(dst_bands.iter_mut()) {
                dst[[row, col]] = band[[sr, sc]];
            }
        }
    }

    write_raster(dst_path, "GTiff", &dst_bands, &dst_gt, target_crs, meta.nodata)?;
    Ok(())
}

fn transformed_bounds(
    meta: &RasterMeta,
    transform: &CoordTransform,
) -> ZonalResult<(f64, f64, f64, f64)> {
    const SAMPLES: usize = 21;
    let mut xs = Vec::with_capacity(SAMPLES * 4);
    let mut ys = Vec::with_capacity(SAMPLES * 4);
    let w = meta.width as f64;
    let h = meta.height as f64;
    for i in 0..SAMPLES {
        let t = i as f64 / (SAMPLES - 1) as f64;
        for (col, row) in [(t * w, 0.0), (t * w, h), (0.0, t * h), (w, t * h)] {
            let (x, y) = pixel_to_geo(&meta.geo_transform, col, row);
            xs.push(x);
            ys.push(y);
        }
    }
    transform.transform_coords(&mut xs, &mut ys, &mut [])?;
    let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !min_x.is_finite() || !max_x.is_finite() || !min_y.is_finite() || !max_y.is_finite() {
        return Err(ZonalError::Processing(
            "source extent does not transform to the target CRS".to_string(),
        ));
    }
    Ok((min_x, min_y, max_x, max_y))
}

/// Stack the prepared rasters onto a common grid, last write wins.
/// Output metadata (band count, nodata, resolution) comes from the first
/// successfully opened input.
fn merge_files(inputs: &[PathBuf], output: &Path, target_crs: &str) -> ZonalResult<()> {
    let mut opened: Vec<(Dataset, RasterMeta)> = Vec::new();
    for path in inputs {
        match Dataset::open(path) {
            Ok(dataset) => {
                let meta = RasterMeta::read(&dataset)?;
                opened.push((dataset, meta));
            }
            Err(e) => {
                log::warn!("cannot open {}: {}", path.display(), e);
            }
        }
    }
    if opened.is_empty() {
        return Err(ZonalError::Processing(
            "no reprojected rasters could be opened".to_string(),
        ));
    }

    let first = &opened[0].1;
    let band_count = first.band_count;
    let nodata = first.nodata;
    let res_x = first.geo_transform[1];
    let res_y = first.geo_transform[5];

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for (_, meta) in &opened {
        let (x0, y0, x1, y1) = meta.bounds();
        min_x = min_x.min(x0);
        min_y = min_y.min(y0);
        max_x = max_x.max(x1);
        max_y = max_y.max(y1);
    }

    let out_width = ((max_x - min_x) / res_x.abs()).ceil().max(1.0) as usize;
    let out_height = ((max_y - min_y) / res_y.abs()).ceil().max(1.0) as usize;
    let out_gt = [min_x, res_x.abs(), 0.0, max_y, 0.0, -res_y.abs()];

    let fill = nodata.map(|v| v as f32).unwrap_or(f32::NAN);
    let mut mosaic: Vec<Array2<f32>> =
        vec![Array2::from_elem((out_height, out_width), fill); band_count];

    for (dataset, meta) in &opened {
        for band_index in 1..=band_count.min(meta.band_count) {
            let data = read_band_f32(dataset, band_index)?;
            let target = &mut mosaic[band_index - 1];
            for ((row, col), value) in data.indexed_iter() {
                if crate::core::raster::is_nodata(*value, meta.nodata) {
                    continue;
                }
                let (x, y) = pixel_to_geo(&meta.geo_transform, col as f64 + 0.5, row as f64 + 0.5);
                let (out_col, out_row) = geo_to_pixel(&out_gt, x, y);
                let (out_col, out_row) = (out_col.floor(), out_row.floor());
                if out_col < 0.0
                    || out_row < 0.0
                    || out_col >= out_width as f64
                    || out_row >= out_height as f64
                {
                    continue;
                }
                target[[out_row as usize, out_col as usize]] = *value;
            }
        }
    }

    write_raster(output, "GTiff", &mosaic, &out_gt, target_crs, nodata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_empty_folder_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let builder = MosaicBuilder::new(ReferenceCrs::FirstInput);
        let result = builder.merge_folder(dir.path(), &dir.path().join("out.tif"));
        assert!(matches!(result, Err(ZonalError::NotFound(_))));
        assert!(!dir.path().join("out.tif").exists());
    }

    #[test]
    fn test_merge_missing_folder_returns_not_found() {
        let builder = MosaicBuilder::new(ReferenceCrs::Epsg(4326));
        let result = builder.merge_folder(
            Path::new("/nonexistent/folder"),
            Path::new("/nonexistent/out.tif"),
        );
        assert!(matches!(result, Err(ZonalError::NotFound(_))));
    }

    #[test]
    fn test_list_tif_files_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "30SUH_b.tif",
            "30SUH_a.tif",
            "30SUH_a_reprojected.tif",
            "notes.txt",
            "NDVI_2020_03.tif",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = list_tif_files(dir.path(), &dir.path().join("NDVI_2020_03.tif")).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["30SUH_a.tif", "30SUH_b.tif"]);
    }
}
