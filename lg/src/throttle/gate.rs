//! Advisory admission gate
//!
//! Compares the cached running-job count against the threshold. The gate is
//! racy: two callers may both see room and both submit, briefly exceeding the
//! threshold by the number of concurrent submitters.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::snapshot::{RefreshError, RunningJobSnapshot};

/// Reasons the gate stays closed
#[derive(Debug, Clone, Error)]
pub enum CapacityError {
    #[error("Warehouse job queue is at {running}, threshold is {threshold}")]
    ThresholdExceeded { running: usize, threshold: usize },

    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// `running < threshold`
pub fn has_capacity(running: usize, threshold: usize) -> bool {
    running < threshold
}

/// Gate over the shared running-jobs snapshot
#[derive(Clone)]
pub struct AdmissionGate {
    snapshot: Arc<RunningJobSnapshot>,
    threshold: usize,
}

impl AdmissionGate {
    pub fn new(snapshot: Arc<RunningJobSnapshot>, threshold: usize) -> Self {
        debug!(threshold, "AdmissionGate::new: called");
        Self { snapshot, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Ok with the observed running count when there is room for one more job
    pub async fn check_capacity(&self) -> Result<usize, CapacityError> {
        let running = self.snapshot.running_jobs().await?.len();
        if has_capacity(running, self.threshold) {
            debug!(running, threshold = self.threshold, "AdmissionGate::check_capacity: open");
            Ok(running)
        } else {
            debug!(running, threshold = self.threshold, "AdmissionGate::check_capacity: full");
            Err(CapacityError::ThresholdExceeded {
                running,
                threshold: self.threshold,
            })
        }
    }
}
