//! Retry-cycle bookkeeping carried in the request envelope

use tracing::debug;

use crate::domain::LoadRequest;

/// Whether a request may spend another submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible { attempts: u32 },
    Expired { attempts: u32 },
}

/// Bounds the number of trips a request makes through the retry channel
///
/// The ceiling is a circuit breaker against systemic failure, not a normal
/// retry limit; see `RECOMMENDED_MIN_RETRY_CYCLES`.
#[derive(Debug, Clone, Copy)]
pub struct RetryCycleTracker {
    max_cycles: u32,
}

impl RetryCycleTracker {
    pub fn new(max_cycles: u32) -> Self {
        debug!(max_cycles, "RetryCycleTracker::new: called");
        Self { max_cycles }
    }

    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }

    /// Eligible iff attempts so far are below the ceiling
    pub fn admit(&self, request: &LoadRequest) -> Eligibility {
        let attempts = request.submission_attempts();
        if attempts < self.max_cycles {
            debug!(attempts, max_cycles = self.max_cycles, "RetryCycleTracker::admit: eligible");
            Eligibility::Eligible { attempts }
        } else {
            debug!(attempts, max_cycles = self.max_cycles, "RetryCycleTracker::admit: expired");
            Eligibility::Expired { attempts }
        }
    }

    /// Count one more consumed cycle, ready for re-queue
    pub fn record_attempt(&self, request: LoadRequest) -> LoadRequest {
        let attempts = request.submission_attempts().saturating_add(1);
        debug!(attempts, "RetryCycleTracker::record_attempt: called");
        request.with_submission_attempts(attempts)
    }
}
