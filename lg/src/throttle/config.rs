//! Throttle configuration

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backoff::BackoffPolicy;

/// What a failed running-jobs refresh means to a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshFailurePolicy {
    /// Treat the backend as full and keep backing off
    #[default]
    AssumeFull,

    /// Stop waiting and report the submission as interrupted
    Interrupt,
}

/// Admission control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Max warehouse jobs allowed to run at once
    #[serde(rename = "concurrent-jobs-threshold", default = "default_threshold")]
    pub concurrent_jobs_threshold: usize,

    /// How long a running-jobs listing stays valid
    #[serde(rename = "running-jobs-cache-ttl-minutes", default = "default_cache_ttl_minutes")]
    pub running_jobs_cache_ttl_minutes: u64,

    /// First backoff delay in seconds
    #[serde(rename = "initial-backoff-secs", default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,

    /// Growth factor between successive delays
    #[serde(rename = "backoff-exponent", default = "default_backoff_exponent")]
    pub backoff_exponent: f64,

    /// Backoff draws per submission attempt before giving up
    #[serde(rename = "max-backoff-retries", default = "default_max_backoff_retries")]
    pub max_backoff_retries: u32,

    /// Upper bound for a single delay
    #[serde(rename = "max-backoff-secs", default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_secs: Option<u64>,

    /// Fraction of each delay randomized, 0 disables jitter
    #[serde(rename = "backoff-jitter", default)]
    pub backoff_jitter: f64,

    /// Seed for jitter; unseeded jitter draws from OS entropy
    #[serde(rename = "backoff-seed", default, skip_serializing_if = "Option::is_none")]
    pub backoff_seed: Option<u64>,

    #[serde(rename = "refresh-failure", default)]
    pub refresh_failure: RefreshFailurePolicy,
}

fn default_threshold() -> usize {
    50
}

fn default_cache_ttl_minutes() -> u64 {
    1
}

fn default_initial_backoff_secs() -> u64 {
    5
}

fn default_backoff_exponent() -> f64 {
    1.5
}

fn default_max_backoff_retries() -> u32 {
    10
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            concurrent_jobs_threshold: default_threshold(),
            running_jobs_cache_ttl_minutes: default_cache_ttl_minutes(),
            initial_backoff_secs: default_initial_backoff_secs(),
            backoff_exponent: default_backoff_exponent(),
            max_backoff_retries: default_max_backoff_retries(),
            max_backoff_secs: None,
            backoff_jitter: 0.0,
            backoff_seed: None,
            refresh_failure: RefreshFailurePolicy::AssumeFull,
        }
    }
}

impl ThrottleConfig {
    /// Get the running-jobs cache TTL as a Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.running_jobs_cache_ttl_minutes.saturating_mul(60))
    }

    /// Build the backoff policy described by this config
    pub fn backoff_policy(&self) -> BackoffPolicy {
        let mut policy = BackoffPolicy::new(
            Duration::from_secs(self.initial_backoff_secs),
            self.backoff_exponent,
            self.max_backoff_retries,
        );
        if let Some(secs) = self.max_backoff_secs {
            policy = policy.with_max_delay(Duration::from_secs(secs));
        }
        if self.backoff_jitter > 0.0 {
            policy = policy.with_jitter(self.backoff_jitter, self.backoff_seed);
        }
        policy
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrent_jobs_threshold == 0 {
            return Err(eyre::eyre!("throttle.concurrent-jobs-threshold must be at least 1"));
        }
        if !self.backoff_exponent.is_finite() || self.backoff_exponent < 1.0 {
            return Err(eyre::eyre!(
                "throttle.backoff-exponent must be >= 1.0, got {}",
                self.backoff_exponent
            ));
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return Err(eyre::eyre!(
                "throttle.backoff-jitter must be in [0, 1), got {}",
                self.backoff_jitter
            ));
        }
        Ok(())
    }
}
