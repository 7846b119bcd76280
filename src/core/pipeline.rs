use crate::core::clip::{clip_to_parcel, OutputFormat};
use crate::core::mosaic::{MosaicBuilder, ReferenceCrs};
use crate::core::stats::calculate_statistics;
use crate::core::temporal::aggregate_monthly;
use crate::io::fetcher::{DownloadTask, Fetcher, DEFAULT_CONCURRENCY};
use crate::io::geometry::{load_parcels, ParcelFeature, ParcelSource};
use crate::io::locator::{AssetLocator, AssetRequest};
use crate::io::store::{HttpObjectStore, ObjectStore, StoreConfig};
use crate::io::tiling;
use crate::types::{
    CollisionPolicy, PeriodRange, ProductName, StatsRecord, TemporalAggregate, ZonalError,
    ZonalResult,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Pipeline configuration: the object store, the reference tiling layer
/// and the processing knobs. Everything is explicit; no stage reads
/// process-global state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub tiling_layer: PathBuf,
    pub concurrency: usize,
    pub reference_crs: ReferenceCrs,
    pub collision_policy: CollisionPolicy,
}

impl PipelineConfig {
    pub fn new(store: StoreConfig, tiling_layer: PathBuf) -> Self {
        PipelineConfig {
            store,
            tiling_layer,
            concurrency: DEFAULT_CONCURRENCY,
            // Cross-zone merges span UTM zones, so the pipeline entry
            // point fixes geographic coordinates as the reference.
            reference_crs: ReferenceCrs::Epsg(4326),
            collision_policy: CollisionPolicy::Strict,
        }
    }
}

/// Everything a pipeline run produced. Artifacts live inside the run's
/// working directory, which is deleted when this value is dropped.
pub struct PipelineOutput {
    pub merged_rasters: Vec<PathBuf>,
    pub clipped_rasters: Vec<PathBuf>,
    pub statistics: Vec<StatsRecord>,
    pub aggregates: Vec<TemporalAggregate>,
    pub statistics_csv: PathBuf,
    pub geojson_files: Vec<PathBuf>,
    workdir: TempDir,
}

impl PipelineOutput {
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Release the working directory without deleting it.
    pub fn into_workdir(self) -> PathBuf {
        self.workdir.into_path()
    }
}

/// End-to-end driver: resolve tiles, locate and fetch imagery, mosaic per
/// period, clip to the parcels, compute zonal statistics and the seasonal
/// aggregate, and write the CSV and GeoJSON artifacts.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline { config }
    }

    /// HTTP store described by the configuration. `run` takes the store
    /// as a parameter so tests can inject a filesystem-backed one.
    pub fn http_store(&self) -> ZonalResult<HttpObjectStore> {
        HttpObjectStore::new(self.config.store.clone())
    }

    pub fn run(
        &self,
        store: &dyn ObjectStore,
        source: &ParcelSource,
        indexes: &[String],
        range: PeriodRange,
    ) -> ZonalResult<PipelineOutput> {
        log::info!("🌍 Starting zonal statistics pipeline");
        let fallback_id = chrono::Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        let indexes: Vec<String> = indexes.iter().map(|i| i.to_uppercase()).collect();
        if indexes.is_empty() {
            return Err(ZonalError::InvalidInput("no indexes requested".to_string()));
        }

        let parcels = load_parcels(source, &fallback_id)?;
        log::info!("normalized {} parcel feature(s)", parcels.len());

        // Step 1: which reference tiles intersect the parcels.
        let tile_index = tiling::shared_index(&self.config.tiling_layer)?;
        let mut zones: BTreeSet<String> = BTreeSet::new();
        for feature in &parcels {
            zones.extend(tile_index.zones_for(&feature.parcel)?);
        }
        if zones.is_empty() {
            return Err(ZonalError::NotFound(
                "parcel does not intersect any reference tile".to_string(),
            ));
        }
        log::info!("parcels cover {} reference tile(s): {:?}", zones.len(), zones);

        // Step 2: enumerate matching imagery.
        let request = AssetRequest::new(zones.into_iter().collect(), range, indexes.clone());
        let catalog = AssetLocator::new(store).scan(&request);
        if catalog.is_empty() {
            return Err(ZonalError::NotFound(
                "no imagery available for the requested date range".to_string(),
            ));
        }

        // Step 3: fetch into a fresh staging directory, one bucket per
        // (year, index, month).
        let workdir = TempDir::new()?;
        let tasks: Vec<DownloadTask> = catalog
            .assets
            .iter()
            .map(|asset| DownloadTask {
                asset: asset.clone(),
                dest_dir: workdir
                    .path()
                    .join(asset.period.year.to_string())
                    .join(&asset.index)
                    .join(asset.period.month_label()),
            })
            .collect();
        let fetched = Fetcher::new(self.config.concurrency).fetch_all(store, &tasks)?;
        if fetched.is_empty() {
            return Err(ZonalError::NotFound(
                "none of the matching objects could be downloaded".to_string(),
            ));
        }

        // Step 4: one mosaic per (year, index, month).
        let builder = MosaicBuilder::new(self.config.reference_crs);
        let mut merged_rasters = Vec::new();
        for year in range.years() {
            for index in &indexes {
                for month in range.months_for_year(year) {
                    let folder = workdir
                        .path()
                        .join(year.to_string())
                        .join(index)
                        .join(format!("{:02}", month));
                    if !folder.is_dir() {
                        continue;
                    }
                    let period = crate::types::Period { year, month };
                    let output = folder.join(ProductName::new(index, period).encode("tif"));
                    match builder.merge_folder(&folder, &output) {
                        Ok(path) => merged_rasters.push(path),
                        Err(ZonalError::NotFound(_)) => {
                            log::debug!("no rasters to merge in {}", folder.display());
                        }
                        Err(e) => {
                            log::warn!("merge failed for {}: {}", folder.display(), e);
                        }
                    }
                }
            }
        }
        if merged_rasters.is_empty() {
            return Err(ZonalError::NotFound(
                "no imagery could be merged for the requested date range".to_string(),
            ));
        }
        log::info!("built {} period mosaic(s)", merged_rasters.len());

        // The clip format follows the merged files, which must share one
        // extension.
        let format = unique_format(&merged_rasters)?;

        // Step 5: clip every mosaic to every parcel.
        let clip_dir = workdir.path().join("clipped");
        let mut clipped_rasters = Vec::new();
        let mut clipped_by_parcel: Vec<(usize, Vec<PathBuf>)> = Vec::new();
        for (i, feature) in parcels.iter().enumerate() {
            let clipped = clip_to_parcel(
                &feature.parcel,
                format,
                &merged_rasters,
                &feature.polygon_id,
                &clip_dir,
            )?;
            clipped_rasters.extend(clipped.iter().cloned());
            clipped_by_parcel.push((i, clipped));
        }

        // Step 6: zonal statistics per index and parcel.
        let mut statistics: Vec<StatsRecord> = Vec::new();
        for index in &indexes {
            for (parcel_idx, clipped) in &clipped_by_parcel {
                let feature = &parcels[*parcel_idx];
                match calculate_statistics(
                    &feature.parcel,
                    clipped,
                    &feature.polygon_id,
                    index,
                    self.config.collision_policy,
                ) {
                    Ok(stats) => statistics.extend(stats.records),
                    Err(ZonalError::NotFound(_)) => {
                        log::warn!(
                            "no clipped rasters for index {} and parcel {}",
                            index,
                            feature.polygon_id
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        if statistics.is_empty() {
            return Err(ZonalError::NotFound(
                "no statistics could be computed for the requested date range".to_string(),
            ));
        }

        // Step 7: seasonal aggregation across years.
        let aggregates = aggregate_monthly(&statistics);

        // Step 8: artifacts.
        let statistics_csv = workdir.path().join("statistics.csv");
        write_statistics_csv(&statistics, &statistics_csv)?;
        let geojson_files =
            write_augmented_geojson(&parcels, &statistics, &aggregates, &indexes, workdir.path())?;

        log::info!(
            "🎉 pipeline complete: {} records across {} parcel(s)",
            statistics.len(),
            parcels.len()
        );
        Ok(PipelineOutput {
            merged_rasters,
            clipped_rasters,
            statistics,
            aggregates,
            statistics_csv,
            geojson_files,
            workdir,
        })
    }
}

/// The single file extension shared by all paths. Mixed formats in one
/// batch are a caller error.
fn unique_format(paths: &[PathBuf]) -> ZonalResult<OutputFormat> {
    let extensions: BTreeSet<String> = paths
        .iter()
        .filter_map(|p| p.extension().and_then(|e| e.to_str()))
        .map(|e| e.to_lowercase())
        .collect();
    if extensions.len() > 1 {
        return Err(ZonalError::InvalidInput(format!(
            "unsupported format mix: images must share one format, got {:?}",
            extensions
        )));
    }
    let extension = extensions.into_iter().next().ok_or_else(|| {
        ZonalError::InvalidInput("image paths carry no file extension".to_string())
    })?;
    OutputFormat::from_extension(&extension).ok_or_else(|| {
        ZonalError::InvalidInput(format!("unsupported image format .{}", extension))
    })
}

fn write_statistics_csv(records: &[StatsRecord], path: &Path) -> ZonalResult<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| ZonalError::Processing(format!("cannot create {}: {}", path.display(), e)))?;
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| ZonalError::Processing(format!("CSV write failed: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| ZonalError::Processing(format!("CSV flush failed: {}", e)))?;
    log::info!("wrote {} statistics rows to {}", records.len(), path.display());
    Ok(())
}

/// One GeoJSON document per index, with `zonalStatistics` (per month-year)
/// and `temporalStatistics` (per month across years) properties attached
/// to every feature.
fn write_augmented_geojson(
    parcels: &[ParcelFeature],
    statistics: &[StatsRecord],
    aggregates: &[TemporalAggregate],
    indexes: &[String],
    out_dir: &Path,
) -> ZonalResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for index in indexes {
        let mut features = Vec::new();
        for parcel in parcels {
            let mut properties = parcel.properties.clone();
            properties.insert(
                "objectID".to_string(),
                serde_json::Value::String(parcel.polygon_id.clone()),
            );

            let mut zonal = serde_json::Map::new();
            for record in statistics
                .iter()
                .filter(|r| r.index == *index && r.polygon_id == parcel.polygon_id)
            {
                zonal.insert(
                    format!("{:02}-{}", record.month, record.year),
                    serde_json::json!({
                        "median": record.median,
                        "mean": record.mean,
                        "std": record.std_dev,
                    }),
                );
            }
            if !zonal.is_empty() {
                properties.insert("zonalStatistics".to_string(), zonal.into());
            }

            let mut temporal = serde_json::Map::new();
            for aggregate in aggregates
                .iter()
                .filter(|a| a.index == *index && a.polygon_id == parcel.polygon_id)
            {
                temporal.insert(
                    format!("{:02}/{}", aggregate.month, aggregate.year_range),
                    serde_json::json!({
                        "median": aggregate.mean_of_medians,
                        "mean": aggregate.mean_of_means,
                        "std": aggregate.mean_of_stds,
                    }),
                );
            }
            if !temporal.is_empty() {
                properties.insert("temporalStatistics".to_string(), temporal.into());
            }

            features.push(serde_json::json!({
                "type": "Feature",
                "geometry": parcel.geometry_json,
                "properties": properties,
            }));
        }

        let document = serde_json::json!({
            "type": "FeatureCollection",
            "features": features,
        });
        let path = out_dir.join(format!("Geojson_{}.geojson", index));
        let rendered = serde_json::to_string_pretty(&document)
            .map_err(|e| ZonalError::Processing(format!("GeoJSON serialization: {}", e)))?;
        std::fs::write(&path, rendered)?;
        files.push(path);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_format_accepts_single() {
        let paths = vec![PathBuf::from("a.tif"), PathBuf::from("b.TIF")];
        assert_eq!(unique_format(&paths).unwrap(), OutputFormat::GeoTiff);
    }

    #[test]
    fn test_unique_format_rejects_mixed() {
        let paths = vec![PathBuf::from("a.tif"), PathBuf::from("b.jp2")];
        assert!(matches!(
            unique_format(&paths),
            Err(ZonalError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_write_statistics_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statistics.csv");
        let records = vec![StatsRecord {
            polygon_id: "p1".to_string(),
            index: "NDVI".to_string(),
            year: 2020,
            month: 3,
            mean: 0.5,
            median: 0.6,
            std_dev: 0.1,
        }];
        write_statistics_csv(&records, &path).unwrap();
        let rendered = std::fs::read_to_string(&path).unwrap();
        assert!(rendered.starts_with("polygon_id,index,year,month,mean,median,std_dev"));
        assert!(rendered.contains("p1,NDVI,2020,3,0.5,0.6,0.1"));
    }
}
