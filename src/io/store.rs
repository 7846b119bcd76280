use crate::types::{ZonalError, ZonalResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bucket holding the monthly index composites.
pub const DEFAULT_BUCKET: &str = "test-am-products";

/// Explicit object-store configuration, passed into every stage that talks
/// to the store. There is no process-wide client.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base endpoint, e.g. "http://minio.example.com:9000".
    pub endpoint: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(endpoint: &str, bucket: &str) -> Self {
        StoreConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            access_key: None,
            secret_key: None,
            timeout: Duration::from_secs(300),
        }
    }

    /// Read the configuration from the environment, using the variable
    /// names the deployment has always used: MINIO_ENDPOINT,
    /// MINIO_ACCESS_KEY, MINIO_SECRET_KEY and optionally MINIO_BUCKET.
    pub fn from_env() -> ZonalResult<Self> {
        let endpoint = std::env::var("MINIO_ENDPOINT").map_err(|_| {
            ZonalError::Configuration("MINIO_ENDPOINT is not set".to_string())
        })?;
        let bucket = std::env::var("MINIO_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string());
        let mut config = StoreConfig::new(&endpoint, &bucket);
        config.access_key = std::env::var("MINIO_ACCESS_KEY").ok();
        config.secret_key = std::env::var("MINIO_SECRET_KEY").ok();
        Ok(config)
    }
}

/// A single listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Minimal content-store interface: list keys under a prefix, fetch one
/// object to a local file. Implementations are fallible and
/// latency-bearing; empty prefixes are a legitimate outcome, not an error.
pub trait ObjectStore: Send + Sync {
    fn list(&self, prefix: &str) -> ZonalResult<Vec<ObjectInfo>>;
    fn fetch(&self, key: &str, dest: &Path) -> ZonalResult<()>;
}

/// S3-compatible HTTP object store speaking the `list-type=2` listing
/// protocol. Works against MinIO and any S3-style gateway.
pub struct HttpObjectStore {
    config: StoreConfig,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
    #[serde(default, rename = "Contents")]
    contents: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    key: String,
    #[serde(default)]
    size: u64,
}

impl HttpObjectStore {
    pub fn new(config: StoreConfig) -> ZonalResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("zonalis/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ZonalError::Remote(format!("failed to create HTTP client: {}", e)))?;
        Ok(HttpObjectStore { config, client })
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.config.endpoint, self.config.bucket)
    }

    fn request(&self, url: &str) -> reqwest::blocking::RequestBuilder {
        let mut builder = self.client.get(url);
        if let (Some(access), Some(secret)) = (&self.config.access_key, &self.config.secret_key) {
            builder = builder.basic_auth(access, Some(secret));
        }
        builder
    }
}

impl ObjectStore for HttpObjectStore {
    fn list(&self, prefix: &str) -> ZonalResult<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(token) = &continuation {
                query.push(("continuation-token", token));
            }

            let response = self
                .request(&self.bucket_url())
                .query(&query)
                .send()
                .map_err(|e| ZonalError::Remote(format!("listing '{}' failed: {}", prefix, e)))?;

            if !response.status().is_success() {
                return Err(ZonalError::Remote(format!(
                    "listing '{}' failed: HTTP {}",
                    prefix,
                    response.status()
                )));
            }

            let body = response
                .text()
                .map_err(|e| ZonalError::Remote(format!("listing '{}' failed: {}", prefix, e)))?;
            let parsed: ListBucketResult = quick_xml::de::from_str(&body).map_err(|e| {
                ZonalError::Remote(format!("unparseable listing for '{}': {}", prefix, e))
            })?;

            objects.extend(parsed.contents.into_iter().map(|entry| ObjectInfo {
                key: entry.key,
                size: entry.size,
            }));

            match (parsed.is_truncated, parsed.next_continuation_token) {
                (true, Some(token)) => continuation = Some(token),
                _ => break,
            }
        }

        log::debug!("listed {} objects under '{}'", objects.len(), prefix);
        Ok(objects)
    }

    fn fetch(&self, key: &str, dest: &Path) -> ZonalResult<()> {
        let url = format!("{}/{}", self.bucket_url(), key);
        let response = self
            .request(&url)
            .send()
            .map_err(|e| ZonalError::Remote(format!("download of '{}' failed: {}", key, e)))?;

        if !response.status().is_success() {
            return Err(ZonalError::Remote(format!(
                "download of '{}' failed: HTTP {}",
                key,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| ZonalError::Remote(format!("download of '{}' failed: {}", key, e)))?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &bytes)?;
        log::debug!("fetched '{}' ({} bytes)", key, bytes.len());
        Ok(())
    }
}

/// Object store backed by a local directory tree. Keys map directly onto
/// relative paths. Used by the test-suite and for offline runs against a
/// mirrored bucket.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FsObjectStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn collect(&self, dir: &Path, objects: &mut Vec<ObjectInfo>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect(&path, objects)?;
            } else {
                let relative = path
                    .strip_prefix(&self.root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace(std::path::MAIN_SEPARATOR, "/");
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                objects.push(ObjectInfo {
                    key: relative,
                    size,
                });
            }
        }
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn list(&self, prefix: &str) -> ZonalResult<Vec<ObjectInfo>> {
        if !self.root.exists() {
            return Err(ZonalError::Remote(format!(
                "store root {} does not exist",
                self.root.display()
            )));
        }
        let mut objects = Vec::new();
        self.collect(&self.root, &mut objects)
            .map_err(|e| ZonalError::Remote(format!("listing store root failed: {}", e)))?;
        objects.retain(|o| o.key.starts_with(prefix));
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn fetch(&self, key: &str, dest: &Path) -> ZonalResult<()> {
        let source = self.root.join(key);
        if !source.exists() {
            return Err(ZonalError::Remote(format!("object '{}' does not exist", key)));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&source, dest)?;
        Ok(())
    }
}
