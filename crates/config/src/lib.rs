//! Skiff Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! A minimal config should just work - only specify what you need to
//! change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use skiff_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[queue]\ntype = \"mem\"").unwrap();
//! ```
//!
//! # Example Minimal Config
//!
//! ```toml
//! [queue]
//! type = "disk"
//!
//! [queue.disk]
//! path = "data/queue"
//! max_size = "1GiB"
//! ```

mod bytes;
mod error;
mod logging;
mod queue;
mod validation;

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

pub use bytes::parse_bytes;
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use queue::{
    DiskQueueConfig, FlushConfig, MemQueueConfig, QueueConfig, QueueSettings, QueueType,
};

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue selection and tuning
    pub queue: QueueConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or contains invalid
    /// TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod lib_test {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.queue.queue_type, QueueType::Mem);
        assert_eq!(config.queue.mem.events, 4096);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skiff.toml");
        std::fs::write(&path, "[queue]\ntype = \"disk\"\n[queue.disk]\npath = \"q\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.queue.queue_type, QueueType::Disk);
    }

    #[test]
    fn test_missing_file_errors() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("not/here.toml"));
    }

    #[test]
    fn test_invalid_toml_errors() {
        assert!(Config::from_str("queue = [[[").is_err());
    }
}
