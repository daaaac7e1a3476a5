//! Configuration types and loading
//!
//! Pool settings come from a TOML file with serde defaults; raw API keys are
//! never stored in the TOML. Credentials resolve from the `POOL_API_KEYS`
//! env var (comma-separated) or, failing that, from `keys_file` (one key per
//! line, `#` comments allowed). Numeric settings are validated after parse so
//! a zero rate or attempt budget fails loudly at startup instead of wedging
//! the pool at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use serde::Deserialize;

use crate::pool::Strategy;

/// Pool configuration.
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    /// Sustained per-key rate ceiling, queries per second
    pub qps_per_key: f64,
    /// Burst ceiling as a multiple of one second's quota
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f64,
    #[serde(default)]
    pub strategy: Strategy,
    /// Consecutive failures that open a key's breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds an open breaker blocks before allowing a probe
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Consecutive probe successes that close a half-open breaker
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Attempt budget for one logical operation
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-attempt transport timeout, seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// File with one raw API key per line (alternative to POOL_API_KEYS)
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    /// Resolved credentials; populated by `load`, never deserialized
    #[serde(skip)]
    pub credentials: Vec<Secret<String>>,
}

fn default_burst_multiplier() -> f64 {
    2.0
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl PoolConfig {
    /// Programmatic construction with defaults; credentials are pushed by
    /// the caller. Used by tests and embedding applications.
    pub fn new(qps_per_key: f64) -> Self {
        Self {
            qps_per_key,
            burst_multiplier: default_burst_multiplier(),
            strategy: Strategy::default(),
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            success_threshold: default_success_threshold(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            keys_file: None,
            credentials: Vec::new(),
        }
    }

    /// Load configuration from a TOML file, validate it, and resolve
    /// credentials.
    ///
    /// Key resolution order:
    /// 1. `POOL_API_KEYS` env var, comma-separated
    /// 2. `keys_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: PoolConfig = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(raw) = std::env::var("POOL_API_KEYS") {
            config.credentials = split_keys(&raw);
        } else if let Some(ref keys_file) = config.keys_file {
            let raw = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            config.credentials = raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(Secret::from)
                .collect();
        }

        if config.credentials.is_empty() {
            return Err(common::Error::Config(
                "no credentials: set POOL_API_KEYS or keys_file".into(),
            ));
        }
        Ok(config)
    }

    /// Reject configurations the pool cannot operate under.
    pub fn validate(&self) -> common::Result<()> {
        if !self.qps_per_key.is_finite() || self.qps_per_key <= 0.0 {
            return Err(common::Error::Config(
                "qps_per_key must be greater than 0".into(),
            ));
        }
        if !self.burst_multiplier.is_finite() || self.burst_multiplier <= 0.0 {
            return Err(common::Error::Config(
                "burst_multiplier must be greater than 0".into(),
            ));
        }
        // A request costs one bucket token; a burst ceiling under one token
        // would leave every key permanently unable to serve
        if self.qps_per_key * self.burst_multiplier < 1.0 {
            return Err(common::Error::Config(format!(
                "qps_per_key * burst_multiplier must be at least 1.0, got {}",
                self.qps_per_key * self.burst_multiplier
            )));
        }
        if self.failure_threshold == 0 {
            return Err(common::Error::Config(
                "failure_threshold must be greater than 0".into(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(common::Error::Config(
                "success_threshold must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn split_keys(raw: &str) -> Vec<Secret<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(Secret::from)
        .collect()
}
