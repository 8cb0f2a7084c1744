//! Run configuration.
//!
//! [`IndexConfig`] is the serializable form (JSON, every field defaulted).
//! [`IndexConfig::validate`] turns it into [`RunParams`], the typed values the
//! pipeline actually runs with, failing fast on anything inconsistent.

use crate::error::{IndexError, Result};
use h3o::Resolution;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

/// Resolution used throughout the reference datasets.
pub const DEFAULT_RESOLUTION: u8 = 5;

/// Default maximum number of rows per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default number of attempts per batch before the run fails.
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Inclusive range of classification values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: i32,
    pub max: i32,
}

impl ValueRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i32) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Default for ValueRange {
    /// Type-of-data codes 10-17, the direct-measurement family.
    fn default() -> Self {
        Self::new(10, 17)
    }
}

/// Configuration for one indexing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// H3 resolution (0-15). Default: 5.
    pub resolution: u8,

    /// Maximum rows per committed batch. `None` commits everything at once.
    /// Default: 1000.
    pub batch_size: Option<usize>,

    /// Attempts per batch before the run fails. Default: 3.
    pub max_commit_attempts: u32,

    /// Values that win over every other value when polygons overlap.
    /// Default: 10-17.
    pub notable_band: ValueRange,

    /// When set, polygons with a value outside this range are dropped before
    /// enumeration. Default: none (all values kept).
    pub source_values: Option<ValueRange>,

    /// Size of a dedicated worker pool. Default: the global rayon pool.
    pub worker_threads: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            batch_size: Some(DEFAULT_BATCH_SIZE),
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            notable_band: ValueRange::default(),
            source_values: None,
            worker_threads: None,
        }
    }
}

impl IndexConfig {
    pub fn with_resolution(mut self, resolution: u8) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts;
        self
    }

    pub fn with_notable_band(mut self, band: ValueRange) -> Self {
        self.notable_band = band;
        self
    }

    pub fn with_source_values(mut self, range: Option<ValueRange>) -> Self {
        self.source_values = range;
        self
    }

    pub fn with_worker_threads(mut self, threads: Option<usize>) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Parse a configuration from JSON text; missing fields take defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check the configuration and convert it to typed run parameters.
    pub fn validate(&self) -> Result<RunParams> {
        let resolution = Resolution::try_from(self.resolution).map_err(|_| {
            IndexError::Config(format!("resolution {} is not in 0-15", self.resolution))
        })?;

        let batch_size = match self.batch_size {
            Some(size) => Some(
                NonZeroUsize::new(size)
                    .ok_or_else(|| IndexError::Config("batch_size must be at least 1".into()))?,
            ),
            None => None,
        };

        if self.max_commit_attempts == 0 {
            return Err(IndexError::Config(
                "max_commit_attempts must be at least 1".into(),
            ));
        }

        check_range("notable_band", &self.notable_band)?;
        if let Some(range) = &self.source_values {
            check_range("source_values", range)?;
        }

        if self.worker_threads == Some(0) {
            return Err(IndexError::Config("worker_threads must be at least 1".into()));
        }

        Ok(RunParams {
            resolution,
            batch_size,
            max_commit_attempts: self.max_commit_attempts,
            notable_band: self.notable_band,
            source_values: self.source_values,
            worker_threads: self.worker_threads,
        })
    }
}

fn check_range(name: &str, range: &ValueRange) -> Result<()> {
    if range.min > range.max {
        return Err(IndexError::Config(format!(
            "{} min {} is greater than max {}",
            name, range.min, range.max
        )));
    }
    Ok(())
}

/// Validated run parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    pub resolution: Resolution,
    pub batch_size: Option<NonZeroUsize>,
    pub max_commit_attempts: u32,
    pub notable_band: ValueRange,
    pub source_values: Option<ValueRange>,
    pub worker_threads: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = IndexConfig::default().validate().unwrap();
        assert_eq!(params.resolution, Resolution::Five);
        assert_eq!(params.batch_size.map(NonZeroUsize::get), Some(1000));
        assert_eq!(params.max_commit_attempts, 3);
        assert_eq!(params.notable_band, ValueRange::new(10, 17));
        assert_eq!(params.source_values, None);
    }

    #[test]
    fn test_from_json_partial() {
        let config = IndexConfig::from_json_str(
            r#"{ "resolution": 7, "batch_size": null, "source_values": { "min": 10, "max": 17 } }"#,
        )
        .unwrap();

        assert_eq!(config.resolution, 7);
        assert_eq!(config.batch_size, None);
        assert_eq!(config.source_values, Some(ValueRange::new(10, 17)));
        assert_eq!(config.max_commit_attempts, DEFAULT_MAX_COMMIT_ATTEMPTS);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, r#"{ "batch_size": 250 }"#).unwrap();

        let config = IndexConfig::from_file(&path).unwrap();
        assert_eq!(config.batch_size, Some(250));
        assert_eq!(config.resolution, DEFAULT_RESOLUTION);
    }

    #[test]
    fn test_invalid_configs() {
        let cases = [
            IndexConfig::default().with_resolution(16),
            IndexConfig::default().with_batch_size(Some(0)),
            IndexConfig::default().with_max_commit_attempts(0),
            IndexConfig::default().with_notable_band(ValueRange::new(17, 10)),
            IndexConfig::default().with_source_values(Some(ValueRange::new(5, 1))),
            IndexConfig::default().with_worker_threads(Some(0)),
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(IndexError::Config(_))),
                "expected config error for {:?}",
                config
            );
        }
    }

    #[test]
    fn test_value_range_contains() {
        let band = ValueRange::default();
        assert!(band.contains(10));
        assert!(band.contains(17));
        assert!(!band.contains(9));
        assert!(!band.contains(18));
    }
}
