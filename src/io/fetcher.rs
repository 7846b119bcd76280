use crate::io::locator::LocatedAsset;
use crate::io::store::ObjectStore;
use crate::types::{ZonalError, ZonalResult};
use rayon::prelude::*;
use std::path::PathBuf;

/// Default width of the download worker pool.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// One pending download: a located asset and the directory it should land
/// in.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub asset: LocatedAsset,
    pub dest_dir: PathBuf,
}

impl DownloadTask {
    /// Local file name, prefixed with the zone so same-named objects from
    /// different zones cannot collide.
    pub fn local_path(&self) -> PathBuf {
        let base = self
            .asset
            .key
            .rsplit('/')
            .next()
            .unwrap_or(self.asset.key.as_str());
        self.dest_dir.join(format!("{}_{}", self.asset.zone, base))
    }
}

/// Concurrent, idempotent downloader over a bounded worker pool.
pub struct Fetcher {
    concurrency: usize,
}

impl Fetcher {
    pub fn new(concurrency: usize) -> Self {
        Fetcher {
            concurrency: concurrency.max(1),
        }
    }

    /// Download every task. Existing destination files are kept as-is.
    /// Individual failures are logged and omitted from the result; the
    /// returned paths follow task submission order.
    pub fn fetch_all(
        &self,
        store: &dyn ObjectStore,
        tasks: &[DownloadTask],
    ) -> ZonalResult<Vec<PathBuf>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        log::info!(
            "fetching {} objects with {} workers",
            tasks.len(),
            self.concurrency
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()
            .map_err(|e| ZonalError::Processing(format!("failed to build worker pool: {}", e)))?;

        let downloaded: Vec<Option<PathBuf>> = pool.install(|| {
            tasks
                .par_iter()
                .map(|task| {
                    let local = task.local_path();
                    if local.exists() {
                        log::debug!("{} already present, skipping download", local.display());
                        return Some(local);
                    }
                    match store.fetch(&task.asset.key, &local) {
                        Ok(()) => Some(local),
                        Err(e) => {
                            log::warn!("download of '{}' failed: {}", task.asset.key, e);
                            None
                        }
                    }
                })
                .collect()
        });

        let files: Vec<PathBuf> = downloaded.into_iter().flatten().collect();
        log::info!("fetched {} of {} objects", files.len(), tasks.len());
        Ok(files)
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Fetcher::new(DEFAULT_CONCURRENCY)
    }
}
