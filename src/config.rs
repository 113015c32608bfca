//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::info;

use crate::error::{FloodgateError, Result};

/// Main configuration for the Floodgate engine and simulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Admission engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Request log configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Bucket algorithm used by both the global and the per-entity limiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Burst up to capacity, refill continuously
    #[default]
    Token,
    /// Queue up to capacity, drain at a fixed rate
    Leaky,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Token => write!(f, "token"),
            Algorithm::Leaky => write!(f, "leaky"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = FloodgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(Algorithm::Token),
            "leaky" => Ok(Algorithm::Leaky),
            other => Err(FloodgateError::Config(format!(
                "unknown algorithm '{}', expected 'token' or 'leaky'",
                other
            ))),
        }
    }
}

/// Capacity and rate of a single bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum stored units
    pub capacity: f64,
    /// Units refilled (token) or drained (leaky) per second
    pub rate: f64,
}

impl BucketConfig {
    /// Create a bucket configuration.
    pub fn new(capacity: f64, rate: f64) -> Self {
        Self { capacity, rate }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "{} capacity must be a positive number (got {})",
                name, self.capacity
            )));
        }
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "{} rate must be a positive number (got {})",
                name, self.rate
            )));
        }
        Ok(())
    }
}

/// Abuse detection and ban parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BanConfig {
    /// Reject ratio at or above which an entity is banned, in (0, 1]
    #[serde(default = "default_ban_threshold")]
    pub threshold: f64,

    /// How long a ban lasts, in seconds
    #[serde(default = "default_ban_duration")]
    pub duration_secs: f64,

    /// Length of the sliding window used to compute the reject ratio
    #[serde(default = "default_window")]
    pub window_secs: f64,

    /// Minimum number of samples in the window before a ban can fire
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            threshold: default_ban_threshold(),
            duration_secs: default_ban_duration(),
            window_secs: default_window(),
            min_samples: default_min_samples(),
        }
    }
}

impl BanConfig {
    /// Ban duration as a [`Duration`].
    pub fn duration(&self) -> Result<Duration> {
        seconds("ban duration", self.duration_secs)
    }

    /// Sliding window length as a [`Duration`].
    pub fn window(&self) -> Result<Duration> {
        seconds("window", self.window_secs)
    }

    fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(FloodgateError::Config(format!(
                "ban threshold must be in (0, 1] (got {})",
                self.threshold
            )));
        }
        self.duration()?;
        self.window()?;
        if self.min_samples < 1 {
            return Err(FloodgateError::Config(
                "min_samples must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Upper bound for ban durations and window lengths (100 years).
pub const MAX_DURATION_SECS: f64 = 100.0 * 365.0 * 24.0 * 3600.0;

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(FloodgateError::Config(format!(
            "{} must be a positive number of seconds (got {})",
            name, secs
        )));
    }
    if secs > MAX_DURATION_SECS {
        return Err(FloodgateError::Config(format!(
            "{} must not exceed {} seconds (got {})",
            name, MAX_DURATION_SECS, secs
        )));
    }

    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|e| FloodgateError::Config(format!("{} out of range: {}", name, e)))?;
    Instant::now()
        .checked_add(duration)
        .ok_or_else(|| FloodgateError::Config(format!("{} out of range (got {})", name, secs)))?;
    Ok(duration)
}

fn default_ban_threshold() -> f64 {
    0.6
}

fn default_ban_duration() -> f64 {
    10.0
}

fn default_window() -> f64 {
    30.0
}

fn default_min_samples() -> usize {
    5
}

/// Admission engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bucket algorithm for both limiters
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Per-entity bucket parameters
    #[serde(default = "default_entity_bucket")]
    pub entity: BucketConfig,

    /// Global bucket parameters
    #[serde(default = "default_global_bucket")]
    pub global: BucketConfig,

    /// Abuse detection parameters
    #[serde(default)]
    pub ban: BanConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            entity: default_entity_bucket(),
            global: default_global_bucket(),
            ban: BanConfig::default(),
        }
    }
}

fn default_entity_bucket() -> BucketConfig {
    BucketConfig::new(5.0, 1.0)
}

fn default_global_bucket() -> BucketConfig {
    BucketConfig::new(100.0, 50.0)
}

impl EngineConfig {
    /// Check every parameter, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        self.entity.validate("entity")?;
        self.global.validate("global")?;
        self.ban.validate()
    }
}

/// Request log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Maximum number of decisions retained for analysis
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
        }
    }
}

/// Ring-buffer bound for the request log.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl LogConfig {
    /// Check that the log can hold at least one entry.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(FloodgateError::Config(
                "log capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl FloodgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Validate the engine and log sections.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.log.validate()
    }
}
