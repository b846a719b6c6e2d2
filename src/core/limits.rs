//! Run limits and the per-source retry policy.
//!
//! Bounds every run through:
//! - An overall run timeout
//! - A collection sub-deadline (a fraction of the run timeout)
//! - A per-fetch timeout
//! - A cap on query keys per source

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SourceId;

/// Limits applied to a single run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLimits {
    /// Whole-run timeout in seconds (default: 900 = 15 min)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    /// Share of the run timeout the collection stage may use (default: 0.5)
    #[serde(default = "default_collection_fraction")]
    pub collection_fraction: f64,

    /// Per-fetch timeout in seconds, unless a source overrides it (default: 60)
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,

    /// Maximum query keys for any one source (default: 500)
    #[serde(default = "default_max_keys")]
    pub max_keys_per_source: usize,
}

fn default_run_timeout() -> u64 {
    900
} // 15 min
fn default_collection_fraction() -> f64 {
    0.5
}
fn default_fetch_timeout() -> u64 {
    60
}
fn default_max_keys() -> usize {
    500
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            run_timeout_seconds: default_run_timeout(),
            collection_fraction: default_collection_fraction(),
            fetch_timeout_seconds: default_fetch_timeout(),
            max_keys_per_source: default_max_keys(),
        }
    }
}

impl RunLimits {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    /// Collection sub-deadline; the fraction is clamped to (0, 1]
    pub fn collection_deadline(&self) -> Duration {
        let fraction = if self.collection_fraction > 0.0 {
            self.collection_fraction.min(1.0)
        } else {
            default_collection_fraction()
        };
        self.run_timeout().mul_f64(fraction)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds.max(1))
    }

    /// Longest whole-second fetch timeout that still lets every attempt of
    /// `retry`, backoff included, finish before the collection deadline
    pub fn max_fetch_timeout_seconds(&self, retry: &RetryPolicy) -> u64 {
        let budget = self
            .collection_deadline()
            .saturating_sub(retry.total_backoff());
        let attempts = u64::from(retry.max_attempts.max(1));
        (budget.as_secs().saturating_sub(1) / attempts).max(1)
    }

    /// Validate resolved run inputs before a run is created
    pub fn validate_inputs(
        &self,
        inputs: &BTreeMap<SourceId, Vec<String>>,
    ) -> Result<(), LimitViolation> {
        if inputs.values().all(Vec::is_empty) {
            return Err(LimitViolation::NoQueryKeys);
        }

        for (source, keys) in inputs {
            if keys.len() > self.max_keys_per_source {
                return Err(LimitViolation::TooManyKeys {
                    source_id: *source,
                    actual: keys.len(),
                    limit: self.max_keys_per_source,
                });
            }
        }

        Ok(())
    }
}

/// Rejected run input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("No query keys for any source")]
    NoQueryKeys,

    #[error("Too many query keys for {source_id}: {actual} > {limit}")]
    TooManyKeys {
        source_id: SourceId,
        actual: usize,
        limit: usize,
    },
}

/// Retry policy for transient source failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Sum of the delays slept between all attempts
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}
