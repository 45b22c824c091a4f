use crate::store::Retention;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error while loading or parsing a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log filter settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Geolocation database.
    #[serde(default)]
    pub geoip: GeoIpConfig,
    /// Where trail buckets live.
    #[serde(default)]
    pub blobs: BlobConfig,
    /// Report generation and storage.
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Loads a config file from TOML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive, used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

/// Geolocation database settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoIpConfig {
    /// Path to an MMDB city database, optionally gzip-compressed.
    pub database_path: Option<PathBuf>,
}

/// Blob store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Local directory whose subdirectories are buckets.
    pub root: Option<PathBuf>,
    /// Maximum keys returned per listing page.
    pub page_size: Option<usize>,
}

/// Report generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Stop reading a partition once this many source bytes were consumed.
    pub max_source_bytes_per_partition: Option<u64>,
    /// Retention class tagged onto stored reports.
    #[serde(default)]
    pub retention: Retention,
    /// Directory for the filesystem report store.
    pub output_dir: Option<PathBuf>,
}
