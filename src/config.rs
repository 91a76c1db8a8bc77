//! Segment configuration.
//!
//! Provides configuration file support via `segment.toml`, plus environment
//! variable overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Environment variables (`SEGMENT_*`)
//! 2. Configuration file (`segment.toml`)
//! 3. Default values

use crate::distance::DistanceMetric;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file or environment overrides.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },
}

/// Fixed per-segment HNSW and batching parameters.
///
/// `space` is frozen for the life of the segment: spec Non-goals forbid
/// changing the distance metric after creation. Every other field is also
/// read once at segment creation; there is no live-reload path because the
/// HNSW graph is constructed around these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Distance metric: `"l2"`, `"cosine"`, or `"ip"`.
    pub space: String,
    /// HNSW degree (bidirectional links per node).
    pub m: usize,
    /// Candidate pool size used while building the graph.
    pub ef_construction: usize,
    /// Candidate pool size used while searching the graph.
    pub ef_search: usize,
    /// Worker threads available to HNSW for neighbor search.
    pub num_threads: usize,
    /// Max records buffered in the brute-force layer before an apply runs.
    pub batch_size: usize,
    /// Records between persist calls. Must be `>= batch_size`.
    pub sync_threshold: usize,
    /// Growth multiplier applied when the HNSW graph must resize.
    pub resize_factor: f32,
    /// Directory under which `{segment_id}/` is created.
    pub persist_directory: String,
    /// Whether `reset_state()` is permitted on this segment.
    pub allow_reset: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            space: "l2".to_string(),
            m: 16,
            ef_construction: 100,
            ef_search: 10,
            num_threads: 1,
            batch_size: 100,
            sync_threshold: 1000,
            resize_factor: 1.2,
            persist_directory: "./segments".to_string(),
            allow_reset: false,
        }
    }
}

impl SegmentConfig {
    /// Loads configuration from `segment.toml` in the current directory,
    /// merged with `SEGMENT_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is present but malformed, or an
    /// environment override cannot be coerced to its field's type.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("segment.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SEGMENT_").split("_").lowercase(false));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string (mainly for tests).
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses the `space` field into a [`DistanceMetric`].
    ///
    /// # Errors
    ///
    /// Returns an error if `space` is not one of `"l2"`, `"cosine"`, `"ip"`.
    pub fn distance_metric(&self) -> Result<DistanceMetric, ConfigError> {
        DistanceMetric::parse(&self.space).ok_or_else(|| ConfigError::InvalidValue {
            key: "space".to_string(),
            message: format!("'{}' is not one of l2, cosine, ip", self.space),
        })
    }

    /// Validates every field named in spec §6, per spec §8's boundary rule
    /// that `batch_size <= sync_threshold` is enforced at construction.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.distance_metric()?;

        if self.batch_size < 3 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size".to_string(),
                message: format!("value {} must be >= 3", self.batch_size),
            });
        }

        if self.sync_threshold < self.batch_size {
            return Err(ConfigError::InvalidValue {
                key: "sync_threshold".to_string(),
                message: format!(
                    "value {} must be >= batch_size ({})",
                    self.sync_threshold, self.batch_size
                ),
            });
        }

        if self.resize_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "resize_factor".to_string(),
                message: format!("value {} must be >= 1.0", self.resize_factor),
            });
        }

        for (key, value) in [
            ("m", self.m),
            ("ef_construction", self.ef_construction),
            ("ef_search", self.ef_search),
            ("num_threads", self.num_threads),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be positive".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
