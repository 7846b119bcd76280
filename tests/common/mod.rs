#![allow(dead_code)]

use ndarray::Array2;
use std::path::Path;
use zonalis::core::raster::write_raster;

/// Write a small single-band GeoTIFF fixture. `origin` is the top-left
/// corner, `resolution` the square pixel size, north-up.
pub fn write_test_raster(
    path: &Path,
    width: usize,
    height: usize,
    origin: (f64, f64),
    resolution: f64,
    crs: &str,
    nodata: Option<f64>,
    value: impl Fn(usize, usize) -> f32,
) {
    let data = Array2::from_shape_fn((height, width), |(row, col)| value(row, col));
    let gt = [origin.0, resolution, 0.0, origin.1, 0.0, -resolution];
    write_raster(path, "GTiff", &[data], &gt, crs, nodata).expect("failed to write test raster");
}

/// Read band 1 of a raster as a row-major array.
pub fn read_test_raster(path: &Path) -> Array2<f32> {
    let dataset = gdal::Dataset::open(path).expect("failed to open raster");
    zonalis::core::raster::read_band_f32(&dataset, 1).expect("failed to read raster")
}
