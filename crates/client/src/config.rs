//! Client configuration.
//!
//! Every field has a named default; a TOML file only needs the keys it
//! overrides.

use std::fs;
use std::path::{Path, PathBuf};

use lattice_world::DEFAULT_BLEND_WEIGHT;
use lattice_world::motion::{DEFAULT_DAMPING, DEFAULT_MAX_SPEED, DEFAULT_VELOCITY_STEP};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Time allowed for the primary endpoint before switching to the fallback.
pub const FALLBACK_GRACE_MS: u64 = 1000;

/// Connection attempts per endpoint stage.
pub const RETRY_LIMIT: u32 = 3;

/// Velocity magnitude treated as "stopped".
pub const STOP_EPSILON: f64 = 0.01;

/// Largest frame the TCP transport will accept or send.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Time allowed for one TCP attempt to connect and complete its handshake.
pub const OPEN_TIMEOUT_MS: u64 = 5000;

/// Failure to load or validate a [`ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub fallback_grace_ms: u64,
    pub retry_limit: u32,
    /// Share of a new snapshot value when smoothing remote motion.
    pub blend_weight: f64,
    pub max_speed: f64,
    pub velocity_step: f64,
    pub damping: f64,
    pub stop_epsilon: f64,
    pub max_frame_len: usize,
    pub open_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            fallback_grace_ms: FALLBACK_GRACE_MS,
            retry_limit: RETRY_LIMIT,
            blend_weight: DEFAULT_BLEND_WEIGHT,
            max_speed: DEFAULT_MAX_SPEED,
            velocity_step: DEFAULT_VELOCITY_STEP,
            damping: DEFAULT_DAMPING,
            stop_epsilon: STOP_EPSILON,
            max_frame_len: MAX_FRAME_LEN,
            open_timeout_ms: OPEN_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Retry limit with 0 treated as 1.
    pub fn effective_retry_limit(&self) -> u32 {
        self.retry_limit.max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });

        if !(self.blend_weight > 0.0 && self.blend_weight <= 1.0) {
            return invalid("blend_weight", "must be in (0, 1]");
        }
        if !(self.damping > 0.0 && self.damping < 1.0) {
            return invalid("damping", "must be strictly between 0 and 1");
        }
        if !(self.max_speed > 0.0 && self.max_speed.is_finite()) {
            return invalid("max_speed", "must be positive");
        }
        if !(self.velocity_step > 0.0 && self.velocity_step.is_finite()) {
            return invalid("velocity_step", "must be positive");
        }
        if !(self.stop_epsilon >= 0.0 && self.stop_epsilon.is_finite()) {
            return invalid("stop_epsilon", "must be non-negative");
        }
        if self.max_frame_len == 0 {
            return invalid("max_frame_len", "must be non-zero");
        }
        if self.open_timeout_ms == 0 {
            return invalid("open_timeout_ms", "must be non-zero");
        }
        Ok(())
    }
}
