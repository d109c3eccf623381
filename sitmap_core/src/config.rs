//! Engine configuration.
//!
//! All distance and time thresholds of the engine derive from a single
//! [`SitmapConfig`]; the merge radius and the "moved" threshold are fixed
//! fractions of `cluster_threshold_m`.

use h3o::Resolution;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the Sitmap engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SitmapConfig {
    /// Clustering threshold in meters (default: 250.0)
    pub cluster_threshold_m: f64,

    /// Render window and merge time window in minutes (default: 120)
    pub lookback_minutes: u32,

    /// Maximum observations kept per channel (default: 300)
    pub capacity: usize,

    /// Confidence assigned to reports that carry none (default: 70.0)
    pub default_confidence: f64,

    /// Default live update period in seconds (default: 300)
    pub live_interval_secs: u64,

    /// Live update periods are never shorter than this (default: 120)
    pub min_live_interval_secs: u64,

    /// H3 resolution of the merge spatial index (default: 9, ~174m edges)
    pub h3_resolution: u8,

    /// Callout lines shown in a caption before truncation (default: 8)
    pub max_callouts: usize,

    /// Characters per callout description (default: 80)
    pub callout_text_limit: usize,
}

impl Default for SitmapConfig {
    fn default() -> Self {
        Self {
            cluster_threshold_m: 250.0,
            lookback_minutes: 120,
            capacity: 300,
            default_confidence: 70.0,
            live_interval_secs: 300,
            min_live_interval_secs: 120,
            h3_resolution: 9,
            max_callouts: 8,
            callout_text_limit: 80,
        }
    }
}

impl SitmapConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cluster_threshold_m.is_finite() && self.cluster_threshold_m > 0.0) {
            return Err(ConfigError::invalid("cluster_threshold_m must be positive"));
        }
        if self.lookback_minutes == 0 {
            return Err(ConfigError::invalid("lookback_minutes must be at least 1"));
        }
        if self.capacity == 0 {
            return Err(ConfigError::invalid("capacity must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.default_confidence) {
            return Err(ConfigError::invalid("default_confidence must be within [0, 100]"));
        }
        if self.live_interval_secs == 0 || self.min_live_interval_secs == 0 {
            return Err(ConfigError::invalid("live intervals must be at least 1 second"));
        }
        if Resolution::try_from(self.h3_resolution).is_err() {
            return Err(ConfigError::invalid("h3_resolution must be within [0, 15]"));
        }
        Ok(())
    }

    /// Merge radius: reports closer than this may describe the same event.
    pub fn merge_radius_m(&self) -> f64 {
        self.cluster_threshold_m / 2.0
    }

    /// Displacement beyond which a re-rendered observation counts as moved.
    pub fn move_threshold_m(&self) -> f64 {
        self.cluster_threshold_m / 4.0
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.lookback_minutes))
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::try_from(self.h3_resolution).unwrap_or(Resolution::Nine)
    }

    /// Live period to use for a requested interval.
    pub fn live_interval(&self, requested: Option<Duration>) -> Duration {
        let requested = requested.unwrap_or(Duration::from_secs(self.live_interval_secs));
        requested.max(Duration::from_secs(self.min_live_interval_secs))
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}
