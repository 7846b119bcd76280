use zonalis::io::{DownloadTask, Fetcher};
use zonalis::{AssetLocator, AssetRequest, FsObjectStore, Period, PeriodRange};

fn seed_store(root: &std::path::Path, key: &str, content: &[u8]) {
    let path = root.join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn march_to_april_2020() -> PeriodRange {
    PeriodRange::new(
        Period::new(2020, 3).unwrap(),
        Period::new(2020, 4).unwrap(),
    )
    .unwrap()
}

#[test]
fn test_scan_and_fetch_end_to_end() {
    let store_dir = tempfile::tempdir().unwrap();
    seed_store(
        store_dir.path(),
        "30SUH/2020/March/composites/indexes/ndvi.tif",
        b"march-ndvi",
    );
    seed_store(
        store_dir.path(),
        "30SUH/2020/March/composites/indexes/ndwi.tif",
        b"march-ndwi",
    );
    seed_store(
        store_dir.path(),
        "30SUH/2020/April/composites/indexes/ndvi.tif",
        b"april-ndvi",
    );
    let store = FsObjectStore::new(store_dir.path());

    let request = AssetRequest::new(
        vec!["30SUH".to_string(), "31TCF".to_string()],
        march_to_april_2020(),
        vec!["ndvi".to_string()],
    );
    let catalog = AssetLocator::new(&store).scan(&request);

    // The zone with zero objects across the whole range is excluded, not
    // fatal.
    assert_eq!(catalog.valid_zones, vec!["30SUH"]);
    assert_eq!(catalog.skipped_zones, vec!["31TCF"]);
    assert_eq!(catalog.assets.len(), 2);
    assert!(catalog.assets.iter().all(|a| a.index == "NDVI"));

    let stage = tempfile::tempdir().unwrap();
    let tasks: Vec<DownloadTask> = catalog
        .assets
        .iter()
        .map(|asset| DownloadTask {
            asset: asset.clone(),
            dest_dir: stage
                .path()
                .join(asset.period.year.to_string())
                .join(&asset.index)
                .join(asset.period.month_label()),
        })
        .collect();

    let files = Fetcher::new(4).fetch_all(&store, &tasks).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files
        .iter()
        .any(|f| f.ends_with("2020/NDVI/03/30SUH_ndvi.tif")));
    assert!(files
        .iter()
        .any(|f| f.ends_with("2020/NDVI/04/30SUH_ndvi.tif")));
    assert_eq!(
        std::fs::read(files.iter().find(|f| f.to_string_lossy().contains("/03/")).unwrap())
            .unwrap(),
        b"march-ndvi"
    );
}

#[test]
fn test_scan_ignores_non_index_products() {
    let store_dir = tempfile::tempdir().unwrap();
    seed_store(
        store_dir.path(),
        "30SUH/2020/March/composites/rgb/b04.tif",
        b"rgb-band",
    );
    seed_store(
        store_dir.path(),
        "30SUH/2020/March/composites/indexes/readme.txt",
        b"not a raster",
    );
    let store = FsObjectStore::new(store_dir.path());

    let request = AssetRequest::new(
        vec!["30SUH".to_string()],
        march_to_april_2020(),
        vec!["NDVI".to_string()],
    );
    let catalog = AssetLocator::new(&store).scan(&request);

    // The zone has listable data, but nothing matches the request.
    assert_eq!(catalog.valid_zones, vec!["30SUH"]);
    assert!(catalog.assets.is_empty());
}
