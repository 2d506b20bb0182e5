//! Typed engine settings backed by the `app_config` table.

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::dashboard::{AggregatorConfig, CacheConfig};
use crate::error::{Error, Result};
use crate::export::{CsvConfig, Orientation, PageSize, PdfConfig};

pub const SUMMARY_TTL_SECS: &str = "dashboard.summary_ttl_secs";
pub const RECENT_TTL_SECS: &str = "dashboard.recent_ttl_secs";
pub const HISTORICAL_TTL_SECS: &str = "dashboard.historical_ttl_secs";
pub const CLEANUP_INTERVAL_SECS: &str = "dashboard.cleanup_interval_secs";
pub const MAX_ITEMS: &str = "dashboard.max_items";
pub const CSV_DELIMITER: &str = "export.csv.delimiter";
pub const PDF_ORIENTATION: &str = "export.pdf.orientation";
pub const PDF_PAGE_SIZE: &str = "export.pdf.page_size";

/// Every recognised key, for `config list` and validation on `config set`.
pub const KNOWN_KEYS: &[&str] = &[
    SUMMARY_TTL_SECS,
    RECENT_TTL_SECS,
    HISTORICAL_TTL_SECS,
    CLEANUP_INTERVAL_SECS,
    MAX_ITEMS,
    CSV_DELIMITER,
    PDF_ORIENTATION,
    PDF_PAGE_SIZE,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSettings {
    pub summary_ttl_secs: u64,
    pub recent_ttl_secs: u64,
    pub historical_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub max_items: usize,
    pub csv_delimiter: char,
    pub pdf_orientation: Orientation,
    pub pdf_page_size: PageSize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            summary_ttl_secs: 300,
            recent_ttl_secs: 300,
            historical_ttl_secs: 3600,
            cleanup_interval_secs: 600,
            max_items: 1000,
            csv_delimiter: ',',
            pdf_orientation: Orientation::Landscape,
            pdf_page_size: PageSize::A4,
        }
    }
}

impl EngineSettings {
    /// Overlay stored `(key, value)` pairs on the defaults. Unknown keys are
    /// ignored; malformed values are errors.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        let mut s = Self::default();
        for (key, value) in pairs {
            s.apply(key, value)?;
        }
        Ok(s)
    }

    /// Check a single value without storing it.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        if !KNOWN_KEYS.contains(&key) {
            return Err(Error::Config(format!("unknown setting: {key}")));
        }
        Self::default().apply(key, value)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            SUMMARY_TTL_SECS => self.summary_ttl_secs = parse(key, value)?,
            RECENT_TTL_SECS => self.recent_ttl_secs = parse(key, value)?,
            HISTORICAL_TTL_SECS => self.historical_ttl_secs = parse(key, value)?,
            CLEANUP_INTERVAL_SECS => self.cleanup_interval_secs = parse(key, value)?,
            MAX_ITEMS => self.max_items = parse(key, value)?,
            CSV_DELIMITER => {
                let mut chars = value.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => self.csv_delimiter = c,
                    _ => {
                        return Err(Error::Config(format!(
                            "{key} must be a single character, got {value:?}"
                        )))
                    }
                }
            }
            PDF_ORIENTATION => self.pdf_orientation = value.parse()?,
            PDF_PAGE_SIZE => self.pdf_page_size = value.parse()?,
            other => log::debug!("Ignoring unrecognised setting {other}"),
        }
        Ok(())
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            cache: CacheConfig {
                default_ttl: Duration::from_secs(self.summary_ttl_secs),
                cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
                max_items: self.max_items,
            },
            summary_ttl: Duration::from_secs(self.summary_ttl_secs),
            recent_ttl: Duration::from_secs(self.recent_ttl_secs),
            historical_ttl: Duration::from_secs(self.historical_ttl_secs),
            ..Default::default()
        }
    }

    pub fn csv_config(&self) -> CsvConfig {
        CsvConfig {
            delimiter: self.csv_delimiter,
            ..Default::default()
        }
    }

    pub fn pdf_config(&self) -> PdfConfig {
        PdfConfig {
            orientation: self.pdf_orientation,
            page_size: self.pdf_page_size,
            ..Default::default()
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}: {e}")))
}
