use crate::io::store::ObjectStore;
use crate::types::{Period, PeriodRange, MONTH_NAMES};
use std::collections::BTreeSet;

/// Structured decoding of a remote object key:
///
/// ```text
/// {zone}/{year}/{MonthName}/{category}/.../indexes/{index}.tif
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetKey {
    pub zone: String,
    pub period: Period,
    pub category: String,
    pub index: String,
}

impl AssetKey {
    /// Decode an object key. Returns `None` for keys outside the expected
    /// shape; the scan skips those instead of failing.
    pub fn parse(key: &str) -> Option<Self> {
        let segments: Vec<&str> = key.split('/').collect();
        if segments.len() < 5 {
            return None;
        }
        let zone = segments[0];
        let year: i32 = segments[1].parse().ok()?;
        let month = MONTH_NAMES
            .iter()
            .position(|name| *name == segments[2])
            .map(|i| i as u32 + 1)?;
        let category = segments[3];

        if !segments.contains(&"indexes") {
            return None;
        }
        let file_name = segments.last()?;
        let stem = file_name.strip_suffix(".tif")?;
        if zone.is_empty() || stem.is_empty() {
            return None;
        }

        Some(AssetKey {
            zone: zone.to_string(),
            period: Period { year, month },
            category: category.to_string(),
            index: stem.to_uppercase(),
        })
    }
}

/// What to look for: which zones, which months, which indexes.
#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub zones: Vec<String>,
    pub range: PeriodRange,
    /// Requested index names, matched case-insensitively.
    pub indexes: Vec<String>,
}

impl AssetRequest {
    pub fn new(zones: Vec<String>, range: PeriodRange, indexes: Vec<String>) -> Self {
        AssetRequest {
            zones,
            range,
            indexes: indexes.into_iter().map(|i| i.to_uppercase()).collect(),
        }
    }
}

/// One remote object that matched the request.
#[derive(Debug, Clone)]
pub struct LocatedAsset {
    pub key: String,
    pub zone: String,
    pub period: Period,
    pub index: String,
    pub size: u64,
}

/// Result of a scan: matched assets plus the zone classification.
#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    pub assets: Vec<LocatedAsset>,
    /// Zones with at least one object anywhere in the range.
    pub valid_zones: Vec<String>,
    /// Zones with zero objects across the whole range, dropped with a
    /// warning.
    pub skipped_zones: Vec<String>,
}

impl AssetCatalog {
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Enumerates matching objects per tile-month prefix and classifies zones
/// as data-bearing or empty.
pub struct AssetLocator<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> AssetLocator<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        AssetLocator { store }
    }

    /// Scan every tile x calendar month in the request. Listing failures
    /// for one prefix are logged and treated as "no data for this month";
    /// they never abort the scan of other tiles or months.
    pub fn scan(&self, request: &AssetRequest) -> AssetCatalog {
        let wanted: BTreeSet<&str> = request.indexes.iter().map(|s| s.as_str()).collect();
        let mut catalog = AssetCatalog::default();

        for zone in &request.zones {
            let mut has_data = false;

            for period in request.range.iter() {
                let prefix = format!(
                    "{}/{}/{}/composites/",
                    zone,
                    period.year,
                    period.month_name()
                );
                let objects = match self.store.list(&prefix) {
                    Ok(objects) => objects,
                    Err(e) => {
                        log::warn!("listing {} failed, treating as no data: {}", prefix, e);
                        continue;
                    }
                };
                if objects.is_empty() {
                    continue;
                }
                has_data = true;

                for object in objects {
                    let Some(asset_key) = AssetKey::parse(&object.key) else {
                        log::debug!("skipping object with unexpected key shape: {}", object.key);
                        continue;
                    };
                    if !wanted.contains(asset_key.index.as_str()) {
                        continue;
                    }
                    catalog.assets.push(LocatedAsset {
                        key: object.key,
                        zone: zone.clone(),
                        period: asset_key.period,
                        index: asset_key.index,
                        size: object.size,
                    });
                }
            }

            if has_data {
                log::info!("zone '{}' has data in the requested range", zone);
                catalog.valid_zones.push(zone.clone());
            } else {
                log::warn!("no data found for zone '{}' in the requested range, skipping", zone);
                catalog.skipped_zones.push(zone.clone());
            }
        }

        log::info!(
            "scan matched {} assets across {} zones ({} zones skipped)",
            catalog.assets.len(),
            catalog.valid_zones.len(),
            catalog.skipped_zones.len()
        );
        catalog
    }
}
