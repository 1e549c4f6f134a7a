//! Submission outcomes

use std::time::Duration;

use crate::warehouse::JobHandle;

/// How a submission attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// The warehouse accepted the job
    Submitted { job: JobHandle, latency: Duration },

    /// The creation call failed; `retryable` is false for errors a later
    /// cycle cannot fix (bad request, missing credentials)
    BackendRejected { cause: String, retryable: bool },

    /// Capacity never freed up within the backoff budget
    BackoffExhausted { cause: String },

    /// Waiting itself failed (cancelled, or a refresh failure under the interrupt policy)
    Interrupted { cause: String },
}

/// Fieldless discriminant, for logging and counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Submitted,
    BackendRejected,
    BackoffExhausted,
    Interrupted,
}

impl SubmissionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Submitted { .. } => OutcomeKind::Submitted,
            Self::BackendRejected { .. } => OutcomeKind::BackendRejected,
            Self::BackoffExhausted { .. } => OutcomeKind::BackoffExhausted,
            Self::Interrupted { .. } => OutcomeKind::Interrupted,
        }
    }

    /// Failure description, `None` for a submitted job
    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Submitted { .. } => None,
            Self::BackendRejected { cause, .. } | Self::BackoffExhausted { cause } | Self::Interrupted { cause } => {
                Some(cause)
            }
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::BackendRejected => write!(f, "backend-rejected"),
            Self::BackoffExhausted => write!(f, "backoff-exhausted"),
            Self::Interrupted => write!(f, "backoff-interrupted"),
        }
    }
}
