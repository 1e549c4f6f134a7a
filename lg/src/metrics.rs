//! Submission counters and latency distribution
//!
//! Tracks, across all workers:
//! - Outcome counts per submission (submitted, exhausted, rejected, interrupted)
//! - Requests sent back for another retry cycle
//! - Dead-lettered and malformed requests
//! - Time from first capacity check to job creation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::throttle::OutcomeKind;

/// Shared metrics for the loader (thread-safe)
#[derive(Debug, Default)]
pub struct LoaderMetrics {
    submitted: AtomicU64,
    backoff_exhausted: AtomicU64,
    backend_rejected: AtomicU64,
    backoff_interrupted: AtomicU64,
    retried_for_resubmission: AtomicU64,
    dead_lettered: AtomicU64,
    malformed: AtomicU64,
    submission_latency: RwLock<LatencyDistribution>,
}

/// Count/sum/min/max of observed latencies, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LatencyDistribution {
    pub count: u64,
    pub sum_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyDistribution {
    pub fn record(&mut self, value_ms: u64) {
        if self.count == 0 {
            self.min_ms = value_ms;
            self.max_ms = value_ms;
        } else {
            self.min_ms = self.min_ms.min(value_ms);
            self.max_ms = self.max_ms.max(value_ms);
        }
        self.count += 1;
        self.sum_ms += value_ms;
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms as f64 / self.count as f64
        }
    }
}

/// Point-in-time copy of all metrics, for display
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub backoff_exhausted: u64,
    pub backend_rejected: u64,
    pub backoff_interrupted: u64,
    pub retried_for_resubmission: u64,
    pub dead_lettered: u64,
    pub malformed: u64,
    pub submission_latency_ms: LatencyDistribution,
}

impl LoaderMetrics {
    pub fn new() -> Self {
        debug!("LoaderMetrics::new: called");
        Self::default()
    }

    /// Count a submission outcome
    pub fn record_outcome(&self, kind: OutcomeKind) {
        debug!(%kind, "LoaderMetrics::record_outcome: called");
        let counter = match kind {
            OutcomeKind::Submitted => &self.submitted,
            OutcomeKind::BackoffExhausted => &self.backoff_exhausted,
            OutcomeKind::BackendRejected => &self.backend_rejected,
            OutcomeKind::Interrupted => &self.backoff_interrupted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried_for_resubmission.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time from first capacity check to job creation
    pub fn record_submission_latency(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        debug!(latency_ms = ms, "LoaderMetrics::record_submission_latency: called");
        self.submission_latency
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record(ms);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            backoff_exhausted: self.backoff_exhausted.load(Ordering::Relaxed),
            backend_rejected: self.backend_rejected.load(Ordering::Relaxed),
            backoff_interrupted: self.backoff_interrupted.load(Ordering::Relaxed),
            retried_for_resubmission: self.retried_for_resubmission.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            submission_latency_ms: self
                .submission_latency
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}
