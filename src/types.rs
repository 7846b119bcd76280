use regex::Regex;
use serde::{Deserialize, Serialize};

/// English month folder names used by the imagery store layout.
pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// A calendar (year, month) bucket used to group imagery and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> ZonalResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(ZonalError::InvalidInput(format!(
                "month {} out of range 1..=12",
                month
            )));
        }
        Ok(Period { year, month })
    }

    /// English folder name for this month ("January".."December").
    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }

    /// Zero-padded two-digit month string.
    pub fn month_label(&self) -> String {
        format!("{:02}", self.month)
    }

    /// Compact period label used in statistic keys: two-digit month followed
    /// by the last two digits of the year, e.g. March 2020 -> "0320".
    pub fn compact_label(&self) -> String {
        format!("{:02}{:02}", self.month, self.year.rem_euclid(100))
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Inclusive (year, month) range spanning one or more years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: Period,
    pub end: Period,
}

impl PeriodRange {
    pub fn new(start: Period, end: Period) -> ZonalResult<Self> {
        if end < start {
            return Err(ZonalError::InvalidInput(format!(
                "period range end {} precedes start {}",
                end, start
            )));
        }
        Ok(PeriodRange { start, end })
    }

    /// Iterate every calendar month in the range, both endpoints included.
    pub fn iter(&self) -> impl Iterator<Item = Period> + '_ {
        let start = self.start;
        let end = self.end;
        (start.year..=end.year).flat_map(move |year| {
            let first = if year == start.year { start.month } else { 1 };
            let last = if year == end.year { end.month } else { 12 };
            (first..=last).map(move |month| Period { year, month })
        })
    }

    /// Months applicable to a single year of the range, honoring the start
    /// and end cut-offs. Empty for years outside the range.
    pub fn months_for_year(&self, year: i32) -> Vec<u32> {
        self.iter()
            .filter(|p| p.year == year)
            .map(|p| p.month)
            .collect()
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start.year..=self.end.year
    }
}

/// Parsed and validated raster product file name.
///
/// Grammar (underscore-delimited, extension `tif` or `jp2`):
///
/// ```text
/// {INDEX}_{YEAR}_{MM}[_{BAND}][_{GEOMETRY_ID}].{ext}
/// ```
///
/// `INDEX` is an alphanumeric index or product token (e.g. `NDVI`), `YEAR`
/// four digits, `MM` a two-digit month. `BAND` is an optional Sentinel-2
/// band token (`B` followed by two digits, or `TCI`). Every remaining token
/// is joined back into `GEOMETRY_ID`, so identifiers containing underscores
/// round-trip unchanged. Statistics parsing depends on this token order;
/// changing it breaks downstream grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductName {
    pub index: String,
    pub period: Period,
    pub band: Option<String>,
    pub geometry_id: Option<String>,
}

impl ProductName {
    pub fn new(index: &str, period: Period) -> Self {
        ProductName {
            index: index.to_uppercase(),
            period,
            band: None,
            geometry_id: None,
        }
    }

    pub fn with_band(mut self, band: &str) -> Self {
        self.band = Some(band.to_uppercase());
        self
    }

    pub fn with_geometry_id(mut self, geometry_id: &str) -> Self {
        self.geometry_id = Some(geometry_id.to_string());
        self
    }

    /// Render the file name with the given extension (without a dot).
    pub fn encode(&self, extension: &str) -> String {
        let mut name = format!(
            "{}_{}_{:02}",
            self.index, self.period.year, self.period.month
        );
        if let Some(band) = &self.band {
            name.push('_');
            name.push_str(band);
        }
        if let Some(id) = &self.geometry_id {
            name.push('_');
            name.push_str(id);
        }
        name.push('.');
        name.push_str(extension);
        name
    }

    /// Parse a product file name. Returns `None` for names outside the
    /// grammar so callers can skip unexpected files instead of failing.
    pub fn parse(file_name: &str) -> Option<Self> {
        let re = Regex::new(r"^(?P<stem>.+)\.(?P<ext>tif|jp2)$").ok()?;
        let caps = re.captures(file_name)?;
        let stem = caps.name("stem")?.as_str();

        let tokens: Vec<&str> = stem.split('_').collect();
        if tokens.len() < 3 {
            return None;
        }
        if tokens[0].is_empty() || !tokens[0].chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        if tokens[1].len() != 4 || tokens[2].len() != 2 {
            return None;
        }
        let year: i32 = tokens[1].parse().ok()?;
        let month: u32 = tokens[2].parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }

        let mut rest = &tokens[3..];
        let band_re = Regex::new(r"^(B\d{2}|TCI)$").ok()?;
        let band = match rest.first() {
            Some(tok) if band_re.is_match(tok) => {
                let b = tok.to_string();
                rest = &rest[1..];
                Some(b)
            }
            _ => None,
        };
        let geometry_id = if rest.is_empty() {
            None
        } else {
            Some(rest.join("_"))
        };

        Some(ProductName {
            index: tokens[0].to_uppercase(),
            period: Period { year, month },
            band,
            geometry_id,
        })
    }
}

/// One zonal statistics row: a single raster summarized over one polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub polygon_id: String,
    pub index: String,
    pub year: i32,
    pub month: u32,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

impl StatsRecord {
    pub fn period(&self) -> Period {
        Period {
            year: self.year,
            month: self.month,
        }
    }
}

/// Seasonal profile row: one calendar month aggregated across all observed
/// years for a polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalAggregate {
    pub polygon_id: String,
    pub index: String,
    pub month: u32,
    pub mean_of_means: f64,
    pub mean_of_medians: f64,
    pub mean_of_stds: f64,
    /// Observed year span, e.g. "2020-2021".
    pub year_range: String,
}

/// Behavior when two rasters map onto the same period label for a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Fail with an error naming the colliding period.
    #[default]
    Strict,
    /// Keep the record from the raster processed last (legacy behavior).
    Replace,
}

/// Error types for the zonal statistics pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ZonalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    /// Reference data or required CRS definitions are missing or corrupt.
    /// Fatal to the run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller-supplied input failed validation; nothing was processed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No rasters or remote objects matched the request.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient object-store failure. Recovered locally by skipping the
    /// affected unit of work.
    #[error("remote store error: {0}")]
    Remote(String),

    #[error("processing error: {0}")]
    Processing(String),
}

/// Result type for pipeline operations.
pub type ZonalResult<T> = Result<T, ZonalError>;
