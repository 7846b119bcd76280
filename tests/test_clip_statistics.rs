mod common;

use approx::assert_relative_eq;
use common::{read_test_raster, write_test_raster};
use geo_types::{LineString, MultiPolygon, Polygon};
use std::path::PathBuf;
use zonalis::core::raster::RasterMeta;
use zonalis::{
    calculate_statistics, clip_to_parcel, CollisionPolicy, OutputFormat, Parcel, ZonalError,
};

fn test_parcel() -> Parcel {
    Parcel::new(
        MultiPolygon(vec![Polygon::new(
            LineString::from(vec![(2.0, 6.0), (6.0, 6.0), (6.0, 8.0), (2.0, 8.0), (2.0, 6.0)]),
            vec![],
        )]),
        "EPSG:4326",
    )
    .expect("valid parcel")
}

/// 10x10 raster over (0, 0)-(10, 10) with value = row * 10 + col.
fn write_gradient(path: &std::path::Path) {
    write_test_raster(path, 10, 10, (0.0, 10.0), 1.0, "EPSG:4326", Some(-9999.0), |row, col| {
        (row * 10 + col) as f32
    });
}

#[test]
fn test_clip_skips_non_intersecting_raster() {
    let dir = tempfile::tempdir().unwrap();
    let inside = dir.path().join("NDVI_2020_03.tif");
    let outside = dir.path().join("NDVI_2020_04.tif");
    write_gradient(&inside);
    // Same grid shifted far away from the parcel.
    write_test_raster(&outside, 10, 10, (100.0, 110.0), 1.0, "EPSG:4326", None, |_, _| 1.0);

    let out_dir = tempfile::tempdir().unwrap();
    let clipped = clip_to_parcel(
        &test_parcel(),
        OutputFormat::GeoTiff,
        &[inside, outside],
        "p1",
        out_dir.path(),
    )
    .unwrap();

    assert_eq!(clipped.len(), 1);
    assert!(clipped[0].ends_with("NDVI_2020_03_p1.tif"));
}

#[test]
fn test_clip_crops_to_envelope_and_keeps_crs() {
    let dir = tempfile::tempdir().unwrap();
    let raster = dir.path().join("NDVI_2020_03.tif");
    write_gradient(&raster);

    let out_dir = tempfile::tempdir().unwrap();
    let clipped = clip_to_parcel(
        &test_parcel(),
        OutputFormat::GeoTiff,
        &[raster],
        "p1",
        out_dir.path(),
    )
    .unwrap();

    let dataset = gdal::Dataset::open(&clipped[0]).unwrap();
    let meta = RasterMeta::read(&dataset).unwrap();
    // Clipping never reprojects.
    assert_eq!(meta.crs, "EPSG:4326");
    // Envelope (2, 6)-(6, 8) on a 1-unit grid.
    assert_eq!((meta.width, meta.height), (4, 2));
    assert_relative_eq!(meta.geo_transform[0], 2.0);
    assert_relative_eq!(meta.geo_transform[3], 8.0);

    // Every pixel center of the window is inside this parcel, so no
    // nodata is introduced.
    let data = read_test_raster(&clipped[0]);
    assert_relative_eq!(data[[0, 0]], 22.0);
    assert_relative_eq!(data[[1, 3]], 35.0);
}

#[test]
fn test_clip_masks_outside_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let raster = dir.path().join("NDVI_2020_03.tif");
    write_gradient(&raster);

    // Triangle covering roughly half of its bounding box.
    let parcel = Parcel::new(
        MultiPolygon(vec![Polygon::new(
            LineString::from(vec![(2.0, 6.0), (6.0, 6.0), (2.0, 8.0), (2.0, 6.0)]),
            vec![],
        )]),
        "EPSG:4326",
    )
    .unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let clipped = clip_to_parcel(
        &parcel,
        OutputFormat::GeoTiff,
        &[raster],
        "p1",
        out_dir.path(),
    )
    .unwrap();

    let data = read_test_raster(&clipped[0]);
    // The corner opposite the hypotenuse stays, the far corner is masked.
    assert_relative_eq!(data[[1, 0]], 32.0);
    assert_relative_eq!(data[[0, 3]], -9999.0);
}

#[test]
fn test_clip_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let raster = dir.path().join("NDVI_2020_03.tif");
    write_gradient(&raster);

    let out_a = tempfile::tempdir().unwrap();
    let out_b = tempfile::tempdir().unwrap();
    let parcel = test_parcel();
    let first = clip_to_parcel(
        &parcel,
        OutputFormat::GeoTiff,
        &[raster.clone()],
        "p1",
        out_a.path(),
    )
    .unwrap();
    let second = clip_to_parcel(
        &parcel,
        OutputFormat::GeoTiff,
        &[raster],
        "p1",
        out_b.path(),
    )
    .unwrap();

    let a = read_test_raster(&first[0]);
    let b = read_test_raster(&second[0]);
    assert_eq!(a, b);
}

#[test]
fn test_clip_with_no_matching_files_fails() {
    let out_dir = tempfile::tempdir().unwrap();
    let result = clip_to_parcel(
        &test_parcel(),
        OutputFormat::Jpeg2000,
        &[PathBuf::from("NDVI_2020_03.tif")],
        "p1",
        out_dir.path(),
    );
    assert!(matches!(result, Err(ZonalError::NotFound(_))));
}

#[test]
fn test_statistics_over_clipped_raster() {
    let dir = tempfile::tempdir().unwrap();
    let raster = dir.path().join("NDVI_2020_03.tif");
    write_gradient(&raster);

    let out_dir = tempfile::tempdir().unwrap();
    let parcel = test_parcel();
    let clipped = clip_to_parcel(
        &parcel,
        OutputFormat::GeoTiff,
        &[raster],
        "p1",
        out_dir.path(),
    )
    .unwrap();

    let stats = calculate_statistics(&parcel, &clipped, "p1", "NDVI", CollisionPolicy::Strict)
        .unwrap();
    assert_eq!(stats.records.len(), 1);
    let record = &stats.records[0];
    assert_eq!((record.year, record.month), (2020, 3));
    // Pixels {22..25, 32..35}.
    assert_relative_eq!(record.mean, 28.5, epsilon = 1e-9);
    assert_relative_eq!(record.median, 28.5, epsilon = 1e-9);
    assert_relative_eq!(record.std_dev, 26.25f64.sqrt(), epsilon = 1e-9);

    let map = stats.flat_map();
    assert!(map.contains_key("0320_mean"));
    assert!(map.contains_key("0320_medi"));
    assert!(map.contains_key("0320_std"));
}

#[test]
fn test_statistics_skip_all_nan_raster() {
    let dir = tempfile::tempdir().unwrap();
    let raster = dir.path().join("NDVI_2020_05.tif");
    write_test_raster(&raster, 10, 10, (0.0, 10.0), 1.0, "EPSG:4326", None, |_, _| f32::NAN);

    let stats = calculate_statistics(
        &test_parcel(),
        &[raster],
        "p1",
        "NDVI",
        CollisionPolicy::Strict,
    )
    .unwrap();
    // Entirely invalid rasters contribute no record, not a zero record.
    assert!(stats.records.is_empty());
}

#[test]
fn test_statistics_collision_policy() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("NDVI_2020_03_a.tif");
    let second = dir.path().join("NDVI_2020_03_b.tif");
    write_test_raster(&first, 10, 10, (0.0, 10.0), 1.0, "EPSG:4326", None, |_, _| 1.0);
    write_test_raster(&second, 10, 10, (0.0, 10.0), 1.0, "EPSG:4326", None, |_, _| 2.0);
    let parcel = test_parcel();

    let strict = calculate_statistics(
        &parcel,
        &[first.clone(), second.clone()],
        "p1",
        "NDVI",
        CollisionPolicy::Strict,
    );
    assert!(matches!(strict, Err(ZonalError::Processing(_))));

    let replace = calculate_statistics(
        &parcel,
        &[first, second],
        "p1",
        "NDVI",
        CollisionPolicy::Replace,
    )
    .unwrap();
    assert_eq!(replace.records.len(), 1);
    assert_relative_eq!(replace.records[0].mean, 2.0, epsilon = 1e-9);
}

#[test]
fn test_statistics_skip_non_intersecting_raster() {
    let dir = tempfile::tempdir().unwrap();
    let outside = dir.path().join("NDVI_2020_03.tif");
    write_test_raster(&outside, 10, 10, (100.0, 110.0), 1.0, "EPSG:4326", None, |_, _| 1.0);

    let stats = calculate_statistics(
        &test_parcel(),
        &[outside],
        "p1",
        "NDVI",
        CollisionPolicy::Strict,
    )
    .unwrap();
    assert!(stats.records.is_empty());
}
