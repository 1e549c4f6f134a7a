//! Admission control for warehouse load jobs
//!
//! Keeps the number of running warehouse jobs under a configured ceiling:
//! a cached view of running jobs feeds an advisory gate, and submissions
//! wait behind an exponential backoff until the gate opens or the retry
//! budget runs out.

mod backoff;
mod config;
mod gate;
mod outcome;
mod snapshot;
mod submitter;

pub use backoff::{Backoff, BackoffPolicy, BackoffStep};
pub use config::{RefreshFailurePolicy, ThrottleConfig};
pub use gate::{AdmissionGate, CapacityError, has_capacity};
pub use outcome::{OutcomeKind, SubmissionOutcome};
pub use snapshot::{RefreshError, RunningJobSnapshot, RunningJobs};
pub use submitter::{JobSubmitter, SleepInterrupted, sleep_or_cancel};
