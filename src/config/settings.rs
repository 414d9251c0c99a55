//! Scheduler settings.
//!
//! One explicit struct enumerates every tunable with documented defaults.
//! Settings load from a JSON file, from environment variables, or both
//! (environment wins for the values it sets).

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::BreakerSettings;
use crate::limiter::RateLimits;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Per-identity call caps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateSettings {
    /// Maximum calls per identity per rolling minute.
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,

    /// Maximum calls per identity per rolling hour.
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
}

fn default_per_minute() -> u32 {
    10
}

fn default_per_hour() -> u32 {
    200
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakerTuning {
    /// Consecutive transient failures before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open breaker waits before allowing a trial call.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Default for BreakerTuning {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Request batching tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchTuning {
    /// Milliseconds a bucket waits before flushing.
    #[serde(default = "default_batch_window_ms")]
    pub window_ms: u64,

    /// Maximum items per batch; a full bucket flushes early.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
}

fn default_batch_window_ms() -> u64 {
    200
}

fn default_batch_max_size() -> usize {
    10
}

impl Default for BatchTuning {
    fn default() -> Self {
        Self {
            window_ms: default_batch_window_ms(),
            max_size: default_batch_max_size(),
        }
    }
}

/// Retry and backoff tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryTuning {
    /// Retries allowed per work item before it fails terminally.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds for the first retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Multiplier applied per additional attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Backoff ceiling in seconds.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Random jitter fraction (0.0 to 1.0) applied to each delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryTuning {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_secs: default_backoff_max_secs(),
            jitter: default_jitter(),
        }
    }
}

impl RetryTuning {
    /// Backoff delay before the given attempt (1-based), with jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1).min(32)).unwrap_or(32);
        #[allow(clippy::cast_precision_loss)]
        let raw = self.backoff_base_ms as f64 * self.backoff_multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = raw.min(self.backoff_max_secs as f64 * 1000.0);

        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            let offset = rand::rng().random_range(-spread..=spread);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(jittered as u64)
    }
}

/// All scheduler tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct SchedulerSettings {
    /// Per-identity rate limits.
    #[serde(default)]
    pub rate: RateSettings,

    /// Circuit breaker tuning.
    #[serde(default)]
    pub breaker: BreakerTuning,

    /// Request batching tuning.
    #[serde(default)]
    pub batch: BatchTuning,

    /// Retry and backoff tuning.
    #[serde(default)]
    pub retry: RetryTuning,
}

impl SchedulerSettings {
    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Saves settings to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Applies environment variable overrides (`DISPATCH_*`).
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("DISPATCH_PER_MINUTE") {
            self.rate.per_minute = v;
        }
        if let Some(v) = env_parse("DISPATCH_PER_HOUR") {
            self.rate.per_hour = v;
        }
        if let Some(v) = env_parse("DISPATCH_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse("DISPATCH_BREAKER_COOLDOWN_SECS") {
            self.breaker.cooldown_secs = v;
        }
        if let Some(v) = env_parse("DISPATCH_BATCH_WINDOW_MS") {
            self.batch.window_ms = v;
        }
        if let Some(v) = env_parse("DISPATCH_BATCH_MAX_SIZE") {
            self.batch.max_size = v;
        }
        if let Some(v) = env_parse("DISPATCH_MAX_RETRIES") {
            self.retry.max_retries = v;
        }
        self
    }

    /// Creates settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self::default().with_env_overrides()
    }

    /// Validates every tunable.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value encountered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate.per_minute == 0 {
            return Err(ConfigError::Invalid {
                field: "rate.per_minute",
                reason: "must be greater than zero",
            });
        }
        if self.rate.per_hour < self.rate.per_minute {
            return Err(ConfigError::Invalid {
                field: "rate.per_hour",
                reason: "must be at least the per-minute cap",
            });
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "breaker.failure_threshold",
                reason: "must be greater than zero",
            });
        }
        if self.batch.max_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch.max_size",
                reason: "must be greater than zero",
            });
        }
        if self.batch.window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "batch.window_ms",
                reason: "must be greater than zero",
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "retry.backoff_multiplier",
                reason: "must be at least 1.0",
            });
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Invalid {
                field: "retry.jitter",
                reason: "must be in [0.0, 1.0)",
            });
        }
        Ok(())
    }

    /// Rate limits in the limiter's terms.
    #[must_use]
    pub const fn rate_limits(&self) -> RateLimits {
        RateLimits {
            per_minute: self.rate.per_minute,
            per_hour: self.rate.per_hour,
        }
    }

    /// Breaker settings in the breaker's terms.
    #[must_use]
    pub const fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: self.breaker.failure_threshold,
            cooldown: Duration::from_secs(self.breaker.cooldown_secs),
        }
    }

    /// Batch flush window.
    #[must_use]
    pub const fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch.window_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
