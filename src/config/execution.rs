//! Execution tuning: batching, pacing, progress reporting and retries.
//!
//! # Example
//!
//! ```toml
//! [execution]
//! batch_size = 5000
//! sleep_secs = 0.5
//! delete_rate = 10000
//! progress_interval = 20000
//! dry_run = false
//!
//! [execution.retry]
//! max_retries = 3
//! ```

use std::{num::NonZeroU32, time::Duration};

use serde::{Deserialize, Serialize};

/// Execution settings for the deletion loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Documents fetched and deleted per batch.
    /// Default: 5000
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Fixed pause after every batch, in seconds, to bound load on the server.
    /// Default: 0.5
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: f64,

    /// Maximum documents deleted per second. 0 = unlimited.
    /// Default: 0
    #[serde(default)]
    pub delete_rate: u32,

    /// Print a progress line each time this many documents have been deleted.
    /// Default: 20000
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Count matching documents without deleting anything.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Retry policy for transient database errors inside the loop.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sleep_secs: default_sleep_secs(),
            delete_rate: 0,
            progress_interval: default_progress_interval(),
            dry_run: false,
            retry: RetryConfig::default(),
        }
    }
}

fn default_batch_size() -> u32 {
    5000
}

fn default_sleep_secs() -> f64 {
    0.5
}

fn default_progress_interval() -> u64 {
    20_000
}

impl ExecutionConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("execution.batch_size must be greater than 0".into());
        }
        if self.progress_interval == 0 {
            return Err("execution.progress_interval must be greater than 0".into());
        }
        if Duration::try_from_secs_f64(self.sleep_secs).is_err() {
            return Err(format!(
                "execution.sleep_secs must be a non-negative number of seconds, got {}",
                self.sleep_secs
            ));
        }
        self.retry.validate()
    }

    /// The fixed pause applied after every batch.
    ///
    /// Zero for a value `validate` would have rejected.
    pub fn inter_batch_sleep(&self) -> Duration {
        Duration::try_from_secs_f64(self.sleep_secs).unwrap_or_default()
    }

    /// The configured deletion rate cap, if any.
    pub fn rate_limit(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.delete_rate)
    }
}

/// Retry configuration for transient database errors.
///
/// Fetches and deletes by identity are idempotent, so retrying them cannot
/// delete anything twice. Retries are off unless `max_retries > 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    /// Default: 0
    #[serde(default)]
    pub max_retries: u32,

    /// Initial delay before first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (percentage, 0.0-1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl RetryConfig {
    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(format!(
                "execution.retry.jitter must be between 0.0 and 1.0, got {}",
                self.jitter
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "execution.retry.backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Calculate the delay for a given retry attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let jitter_range = capped_delay * self.jitter;
        let jitter = if jitter_range > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        let final_delay = (capped_delay + jitter).max(0.0);
        Duration::from_millis(final_delay as u64)
    }
}
