//! Job submission behind the admission gate
//!
//! Checks capacity, and either creates the load job or sleeps for the next
//! backoff delay and checks again. Every path ends in a SubmissionOutcome;
//! nothing here returns an error to the caller.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{BackoffPolicy, BackoffStep};
use super::config::{RefreshFailurePolicy, ThrottleConfig};
use super::gate::{AdmissionGate, CapacityError};
use super::outcome::SubmissionOutcome;
use super::snapshot::RunningJobSnapshot;
use crate::warehouse::{LoadJobSpec, TableRef, WarehouseClient};

/// A backoff sleep was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Backoff sleep interrupted by cancellation")]
pub struct SleepInterrupted;

/// Sleep for `delay` unless the token is cancelled first
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), SleepInterrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SleepInterrupted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Submits one load job per call, waiting for capacity first
pub struct JobSubmitter {
    warehouse: Arc<dyn WarehouseClient>,
    gate: AdmissionGate,
    backoff: BackoffPolicy,
    refresh_failure: RefreshFailurePolicy,
    cancel: CancellationToken,
}

impl JobSubmitter {
    pub fn new(
        warehouse: Arc<dyn WarehouseClient>,
        gate: AdmissionGate,
        backoff: BackoffPolicy,
        refresh_failure: RefreshFailurePolicy,
    ) -> Self {
        debug!(threshold = gate.threshold(), ?refresh_failure, "JobSubmitter::new: called");
        Self {
            warehouse,
            gate,
            backoff,
            refresh_failure,
            cancel: CancellationToken::new(),
        }
    }

    /// Wire a snapshot, gate, and backoff policy from configuration
    pub fn from_config(warehouse: Arc<dyn WarehouseClient>, config: &ThrottleConfig) -> Self {
        let snapshot = Arc::new(RunningJobSnapshot::new(
            warehouse.clone(),
            config.concurrent_jobs_threshold,
            config.cache_ttl(),
        ));
        let gate = AdmissionGate::new(snapshot, config.concurrent_jobs_threshold);
        Self::new(warehouse, gate, config.backoff_policy(), config.refresh_failure)
    }

    /// Interrupt backoff sleeps when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[cfg(test)]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Submit one load job, waiting for capacity first
    pub async fn submit(&self, destination: TableRef, source_uri: &str) -> SubmissionOutcome {
        debug!(%destination, %source_uri, "JobSubmitter::submit: called");
        let spec = LoadJobSpec::append_avro(destination, source_uri);
        let started = Instant::now();
        let mut backoff = self.backoff.backoff();

        loop {
            let capacity = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(destination = %spec.destination, "Capacity check interrupted");
                    return SubmissionOutcome::Interrupted {
                        cause: "Capacity check interrupted by cancellation".to_string(),
                    };
                }
                capacity = self.gate.check_capacity() => capacity,
            };

            let closed = match capacity {
                Ok(running) => {
                    debug!(running, "JobSubmitter::submit: capacity available, creating job");
                    return match self.warehouse.create_load_job(&spec).await {
                        Ok(job) => {
                            let latency = started.elapsed();
                            info!(
                                job_id = %job.qualified_id(),
                                destination = %spec.destination,
                                latency_ms = latency.as_millis() as u64,
                                "Load job submitted"
                            );
                            SubmissionOutcome::Submitted { job, latency }
                        }
                        Err(e) => {
                            warn!(
                                destination = %spec.destination,
                                error = %e,
                                service_error = e.is_service_error(),
                                retryable = e.is_retryable(),
                                "Load job creation rejected"
                            );
                            SubmissionOutcome::BackendRejected {
                                cause: e.to_string(),
                                retryable: e.is_retryable(),
                            }
                        }
                    };
                }
                Err(CapacityError::Refresh(e)) if self.refresh_failure == RefreshFailurePolicy::Interrupt => {
                    warn!(error = %e, "JobSubmitter::submit: refresh failed, interrupting");
                    return SubmissionOutcome::Interrupted { cause: e.to_string() };
                }
                Err(e) => e,
            };

            match backoff.next_step() {
                BackoffStep::Wait(delay) => {
                    debug!(reason = %closed, delay_ms = delay.as_millis() as u64, "JobSubmitter::submit: backing off");
                    if let Err(e) = sleep_or_cancel(delay, &self.cancel).await {
                        warn!(destination = %spec.destination, "Backoff interrupted");
                        return SubmissionOutcome::Interrupted { cause: e.to_string() };
                    }
                }
                BackoffStep::Exhausted => {
                    warn!(
                        destination = %spec.destination,
                        draws = backoff.draws(),
                        reason = %closed,
                        "Backoff exhausted"
                    );
                    return SubmissionOutcome::BackoffExhausted {
                        cause: closed.to_string(),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::client::mock::MockWarehouse;

    fn submitter(mock: &Arc<MockWarehouse>, threshold: usize, max_retries: u32) -> JobSubmitter {
        let config = ThrottleConfig {
            concurrent_jobs_threshold: threshold,
            initial_backoff_secs: 1,
            backoff_exponent: 2.0,
            max_backoff_retries: max_retries,
            // Zero TTL: every capacity check sees a fresh listing
            running_jobs_cache_ttl_minutes: 0,
            ..Default::default()
        };
        JobSubmitter::from_config(mock.clone(), &config)
    }

    fn table() -> TableRef {
        TableRef::new("acme", "events", "clicks")
    }

    #[tokio::test(start_paused = true)]
    async fn test_submits_when_capacity_available() {
        let mock = Arc::new(MockWarehouse::with_running(3));
        let outcome = submitter(&mock, 5, 3).submit(table(), "gs://b/x").await;

        match outcome {
            SubmissionOutcome::Submitted { job, latency } => {
                assert_eq!(job.job_id, "load-0");
                assert_eq!(latency, Duration::ZERO);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(mock.create_calls(), 1);

        let created = mock.created();
        assert_eq!(created[0].destination, table());
        assert_eq!(created[0].source_uri, "gs://b/x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_exhausted_when_always_full() {
        let mock = Arc::new(MockWarehouse::with_running(5));
        let started = Instant::now();
        let outcome = submitter(&mock, 5, 3).submit(table(), "gs://b/x").await;

        assert!(matches!(outcome, SubmissionOutcome::BackoffExhausted { .. }));
        assert_eq!(mock.create_calls(), 0);
        // Four checks around three sleeps of 1s, 2s, 4s
        assert_eq!(mock.list_calls(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_capacity_frees() {
        let mock = Arc::new(MockWarehouse::with_running(5));
        let submitter = Arc::new(submitter(&mock, 5, 5));

        let task = {
            let submitter = submitter.clone();
            tokio::spawn(async move { submitter.submit(table(), "gs://b/x").await })
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        mock.set_running(2);

        let outcome = task.await.unwrap();
        match outcome {
            SubmissionOutcome::Submitted { latency, .. } => assert_eq!(latency, Duration::from_secs(3)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_rejection_skips_backoff() {
        let mock = Arc::new(MockWarehouse::with_running(0));
        mock.set_reject_creates(true);
        let started = Instant::now();

        let outcome = submitter(&mock, 5, 3).submit(table(), "gs://b/x").await;

        assert_eq!(
            outcome,
            SubmissionOutcome::BackendRejected {
                cause: "API error 500: backendError".to_string(),
                retryable: true,
            }
        );
        assert_eq!(mock.create_calls(), 1);
        assert_eq!(mock.list_calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_assumes_full() {
        let mock = Arc::new(MockWarehouse::with_running(0));
        mock.set_fail_listing(true);

        let outcome = submitter(&mock, 5, 2).submit(table(), "gs://b/x").await;

        match outcome {
            SubmissionOutcome::BackoffExhausted { cause } => assert!(cause.contains("refresh")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(mock.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_interrupt_policy() {
        let mock = Arc::new(MockWarehouse::with_running(0));
        mock.set_fail_listing(true);
        let config = ThrottleConfig {
            concurrent_jobs_threshold: 5,
            refresh_failure: RefreshFailurePolicy::Interrupt,
            ..Default::default()
        };

        let outcome = JobSubmitter::from_config(mock.clone(), &config)
            .submit(table(), "gs://b/x")
            .await;

        assert!(matches!(outcome, SubmissionOutcome::Interrupted { .. }));
        assert_eq!(mock.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let mock = Arc::new(MockWarehouse::with_running(5));
        let cancel = CancellationToken::new();
        let submitter = Arc::new(submitter(&mock, 5, 10).with_cancellation(cancel.clone()));

        let task = {
            let submitter = submitter.clone();
            tokio::spawn(async move { submitter.submit(table(), "gs://b/x").await })
        };

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Interrupted { .. }));
        assert_eq!(mock.create_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_slow_listing() {
        let mock = Arc::new(MockWarehouse::with_running(0));
        mock.set_list_delay(Duration::from_secs(600));
        let cancel = CancellationToken::new();
        let submitter = Arc::new(submitter(&mock, 5, 10).with_cancellation(cancel.clone()));
        let started = Instant::now();

        let task = {
            let submitter = submitter.clone();
            tokio::spawn(async move { submitter.submit(table(), "gs://b/x").await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let outcome = task.await.unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Interrupted { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(mock.list_calls(), 1);
        assert_eq!(mock.create_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let cancel = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(1), &cancel).await.is_ok());

        cancel.cancel();
        assert_eq!(
            sleep_or_cancel(Duration::from_secs(1), &cancel).await,
            Err(SleepInterrupted)
        );
    }
}
