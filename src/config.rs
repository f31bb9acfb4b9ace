use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};
use thiserror::Error;

use crate::{Error, LensResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LensConfig {
    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoaderConfig {
    /// Width of the decoded pixel buffer handed to the extractor
    #[serde(default = "default_input_size")]
    pub width: u32,

    #[serde(default = "default_input_size")]
    pub height: u32,

    /// Deadline for a single image fetch, including the body
    #[serde(default = "default_fetch_timeout", with = "duration_ms")]
    pub fetch_timeout: Duration,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Base for resolving relative image links (e.g. `file:///srv/gallery/`)
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            width: default_input_size(),
            height: default_input_size(),
            fetch_timeout: default_fetch_timeout(),
            max_image_bytes: default_max_image_bytes(),
            user_agent: default_user_agent(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on stored embeddings; `None` keeps everything
    #[serde(default = "default_max_entries")]
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,

    #[serde(default)]
    pub max_results: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: default_max_concurrent_loads(),
            max_results: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractorConfig {
    /// Bins per colour channel for the built-in histogram extractor
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            histogram_bins: default_histogram_bins(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl LensConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> LensResult<Self> {
        let config: Self = from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(s: &str) -> LensResult<Self> {
        let config: Self = from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loader.width == 0 || self.loader.height == 0 {
            return Err(ConfigError::invalid(
                "loader.width/height",
                "Input dimensions must be greater than 0",
            ));
        }
        if self.loader.fetch_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "loader.fetch_timeout",
                "Fetch timeout must be greater than 0",
            ));
        }
        if self.loader.max_image_bytes == 0 {
            return Err(ConfigError::invalid(
                "loader.max_image_bytes",
                "Max image size must be greater than 0",
            ));
        }
        if self.cache.max_entries == Some(0) {
            return Err(ConfigError::invalid(
                "cache.max_entries",
                "Max entries must be greater than 0 when set",
            ));
        }
        if self.search.max_concurrent_loads == 0 {
            return Err(ConfigError::invalid(
                "search.max_concurrent_loads",
                "Concurrency must be greater than 0",
            ));
        }
        if !(1..=16).contains(&self.extractor.histogram_bins) {
            return Err(ConfigError::invalid(
                "extractor.histogram_bins",
                "Histogram bins must be between 1 and 16",
            ));
        }
        Ok(())
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> LensResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> LensResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_input_size() -> u32 {
    224
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_user_agent() -> String {
    concat!("pagelens/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> Option<usize> {
    Some(4096)
}

fn default_max_concurrent_loads() -> usize {
    16
}

fn default_histogram_bins() -> usize {
    4
}

// Duration <-> milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
