use crate::io::geometry::{crs_string, spatial_ref_from};
use crate::types::{ZonalError, ZonalResult};
use gdal::raster::Buffer;
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Metadata of an open raster, captured once so later stages can work on
/// plain values while the dataset handle stays scoped.
#[derive(Debug, Clone)]
pub struct RasterMeta {
    pub width: usize,
    pub height: usize,
    pub geo_transform: [f64; 6],
    pub crs: String,
    pub band_count: usize,
    pub nodata: Option<f64>,
}

impl RasterMeta {
    pub fn read(dataset: &Dataset) -> ZonalResult<Self> {
        let (width, height) = dataset.raster_size();
        let geo_transform = dataset.geo_transform()?;
        let crs = crs_string(&dataset.spatial_ref()?)?;
        let band_count = dataset.raster_count() as usize;
        let nodata = dataset.rasterband(1)?.no_data_value();
        Ok(RasterMeta {
            width,
            height,
            geo_transform,
            crs,
            band_count,
            nodata,
        })
    }

    /// Raster extent (min_x, min_y, max_x, max_y) in its CRS. Assumes a
    /// north-up transform.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let gt = &self.geo_transform;
        let x0 = gt[0];
        let y0 = gt[3];
        let x1 = gt[0] + self.width as f64 * gt[1];
        let y1 = gt[3] + self.height as f64 * gt[5];
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Convert pixel (col, row) to geo coordinates using the transform.
pub fn pixel_to_geo(gt: &[f64; 6], col: f64, row: f64) -> (f64, f64) {
    let x = gt[0] + col * gt[1] + row * gt[2];
    let y = gt[3] + col * gt[4] + row * gt[5];
    (x, y)
}

/// Convert geo coordinates to fractional pixel (col, row). North-up
/// transforms only.
pub fn geo_to_pixel(gt: &[f64; 6], x: f64, y: f64) -> (f64, f64) {
    let col = (x - gt[0]) / gt[1];
    let row = (y - gt[3]) / gt[5];
    (col, row)
}

/// Read one band (1-based) into a row-major array of f32.
pub fn read_band_f32(dataset: &Dataset, band: usize) -> ZonalResult<Array2<f32>> {
    let (width, height) = dataset.raster_size();
    let rasterband = dataset.rasterband(band as isize)?;
    let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| ZonalError::Processing(format!("failed to reshape raster data: {}", e)))
}

/// Read a pixel window of one band (1-based) into a row-major f32 array.
pub fn read_window_f32(
    dataset: &Dataset,
    band: usize,
    offset: (isize, isize),
    size: (usize, usize),
) -> ZonalResult<Array2<f32>> {
    let rasterband = dataset.rasterband(band as isize)?;
    let buffer = rasterband.read_as::<f32>(offset, size, size, None)?;
    Array2::from_shape_vec((size.1, size.0), buffer.data)
        .map_err(|e| ZonalError::Processing(format!("failed to reshape raster window: {}", e)))
}

/// Write bands to a new raster file using the named GDAL driver. The
/// "GTiff" and "JP2OpenJPEG" drivers are the two recognized outputs;
/// JPEG2000 cannot be created directly, so it goes through an in-memory
/// dataset and a copy.
pub fn write_raster(
    path: &Path,
    driver_name: &str,
    bands: &[Array2<f32>],
    geo_transform: &[f64; 6],
    crs: &str,
    nodata: Option<f64>,
) -> ZonalResult<()> {
    if bands.is_empty() {
        return Err(ZonalError::Processing(
            "no bands to write".to_string(),
        ));
    }
    let (height, width) = bands[0].dim();
    let path_str = path
        .to_str()
        .ok_or_else(|| ZonalError::Processing(format!("non-UTF8 path: {}", path.display())))?;

    let wkt = spatial_ref_from(crs)?.to_wkt()?;
    if driver_name == "GTiff" {
        let driver = gdal::DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<f32, _>(
            path_str,
            width as isize,
            height as isize,
            bands.len() as isize,
        )?;
        fill_dataset(&mut dataset, bands, geo_transform, &wkt, nodata)?;
    } else {
        let mem = gdal::DriverManager::get_driver_by_name("MEM")?;
        let mut staged = mem.create_with_band_type::<f32, _>(
            "",
            width as isize,
            height as isize,
            bands.len() as isize,
        )?;
        fill_dataset(&mut staged, bands, geo_transform, &wkt, nodata)?;
        let driver = gdal::DriverManager::get_driver_by_name(driver_name)?;
        staged.create_copy(&driver, path_str, &[])?;
    }
    Ok(())
}

fn fill_dataset(
    dataset: &mut Dataset,
    bands: &[Array2<f32>],
    geo_transform: &[f64; 6],
    crs_wkt: &str,
    nodata: Option<f64>,
) -> ZonalResult<()> {
    let (height, width) = bands[0].dim();
    dataset.set_geo_transform(geo_transform)?;
    dataset.set_projection(crs_wkt)?;
    for (i, band) in bands.iter().enumerate() {
        if band.dim() != (height, width) {
            return Err(ZonalError::Processing(
                "band dimensions do not match".to_string(),
            ));
        }
        let mut rasterband = dataset.rasterband((i + 1) as isize)?;
        if let Some(value) = nodata {
            rasterband.set_no_data_value(Some(value))?;
        }
        let data: Vec<f32> = band.iter().copied().collect();
        let buffer = Buffer::new((width, height), data);
        rasterband.write((0, 0), (width, height), &buffer)?;
    }
    Ok(())
}

/// Whether a pixel value is invalid: NaN or equal to the declared nodata
/// sentinel.
pub fn is_nodata(value: f32, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(sentinel) => (value as f64 - sentinel).abs() < f64::EPSILON * sentinel.abs().max(1.0),
        None => false,
    }
}
