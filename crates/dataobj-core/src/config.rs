//! Runtime configuration.
//!
//! All settings are plain `serde` structs with defaults, so a configuration
//! file only needs to mention the values it overrides:
//!
//! ```json
//! { "metastore": { "partition_window_secs": 3600 }, "uploader": { "sha_prefix_size": 4 } }
//! ```
//!
//! Call [`Config::validate`] after deserializing; zero values that would make
//! an operation loop forever or never batch are rejected there.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Invalid configuration values.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// A setting that must be positive was zero.
    #[snafu(display("Config value {field} must be greater than zero"))]
    Zero {
        /// Dotted name of the offending setting.
        field: &'static str,
    },

    /// The hash prefix length is longer than a BLAKE3 hex digest.
    #[snafu(display("uploader.sha_prefix_size must be below 64, got {value}"))]
    PrefixTooLong {
        /// The configured value.
        value: usize,
    },
}

/// Metastore settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetastoreConfig {
    /// Width of one index partition window, in seconds.
    pub partition_window_secs: u64,
    /// How many times a conflicting index commit is retried.
    pub max_commit_attempts: u32,
    /// Maximum number of objects fetched concurrently per query.
    pub fetch_concurrency: usize,
}

impl Default for MetastoreConfig {
    fn default() -> Self {
        Self {
            partition_window_secs: 12 * 60 * 60,
            max_commit_attempts: 8,
            fetch_concurrency: 8,
        }
    }
}

impl MetastoreConfig {
    /// Partition window width as a duration.
    pub fn partition_window(&self) -> TimeDelta {
        TimeDelta::seconds(i64::try_from(self.partition_window_secs).unwrap_or(i64::MAX))
    }

    /// Reject zero values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.partition_window_secs > 0,
            ZeroSnafu {
                field: "metastore.partition_window_secs"
            }
        );
        ensure!(
            self.max_commit_attempts > 0,
            ZeroSnafu {
                field: "metastore.max_commit_attempts"
            }
        );
        ensure!(
            self.fetch_concurrency > 0,
            ZeroSnafu {
                field: "metastore.fetch_concurrency"
            }
        );
        Ok(())
    }
}

/// Uploader settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Number of leading hex characters of the content hash used as a
    /// directory level.
    pub sha_prefix_size: usize,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self { sha_prefix_size: 2 }
    }
}

impl UploaderConfig {
    /// Reject zero and over-long prefixes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.sha_prefix_size > 0,
            ZeroSnafu {
                field: "uploader.sha_prefix_size"
            }
        );
        ensure!(
            self.sha_prefix_size < 64,
            PrefixTooLongSnafu {
                value: self.sha_prefix_size
            }
        );
        Ok(())
    }
}

/// Data object builder thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// A Logs section is closed once it holds this many rows.
    pub max_section_rows: usize,
    /// A Streams section is closed once it holds this many streams.
    pub max_section_streams: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_section_rows: 100_000,
            max_section_streams: 10_000,
        }
    }
}

impl BuilderConfig {
    /// Reject zero thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.max_section_rows > 0,
            ZeroSnafu {
                field: "builder.max_section_rows"
            }
        );
        ensure!(
            self.max_section_streams > 0,
            ZeroSnafu {
                field: "builder.max_section_streams"
            }
        );
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Metastore settings.
    pub metastore: MetastoreConfig,
    /// Uploader settings.
    pub uploader: UploaderConfig,
    /// Builder settings.
    pub builder: BuilderConfig,
}

impl Config {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.metastore.validate()?;
        self.uploader.validate()?;
        self.builder.validate()
    }
}
