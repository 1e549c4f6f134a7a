//! RequestRouter: eligibility check, submission, and routing for one message

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::route::Route;
use super::tracker::{Eligibility, RetryCycleTracker};
use crate::domain::{LoadRequest, LoaderEnvelope, Message};
use crate::metrics::LoaderMetrics;
use crate::throttle::{JobSubmitter, SubmissionOutcome};

/// Where a message is in its trip through the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStage {
    Received,
    EligibilityCheck,
    Submitting,
    Routed,
}

/// Decides the single output for each inbound message
pub struct RequestRouter {
    project: String,
    tracker: RetryCycleTracker,
    submitter: Arc<JobSubmitter>,
    metrics: Arc<LoaderMetrics>,
}

impl RequestRouter {
    pub fn new(
        project: impl Into<String>,
        tracker: RetryCycleTracker,
        submitter: Arc<JobSubmitter>,
        metrics: Arc<LoaderMetrics>,
    ) -> Self {
        let project = project.into();
        debug!(%project, max_cycles = tracker.max_cycles(), "RequestRouter::new: called");
        Self {
            project,
            tracker,
            submitter,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<LoaderMetrics> {
        &self.metrics
    }

    /// Route one message; never fails, every message gets exactly one route
    pub async fn route(&self, message: &Message) -> Route {
        debug!(stage = ?RouteStage::Received, len = message.data.len(), "RequestRouter::route: called");
        let request = match LoadRequest::from_json(&message.data) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Unreadable load request, dead-lettering raw payload");
                self.metrics.record_malformed();
                self.metrics.record_dead_letter();
                return Route::DeadLetter(message.data.clone());
            }
        };

        debug!(stage = ?RouteStage::EligibilityCheck, "RequestRouter::route: checking retry cycles");
        if let Eligibility::Expired { attempts } = self.tracker.admit(&request) {
            warn!(
                attempts,
                source = %request.source_uri(),
                "Retry cycles exhausted, dead-lettering load request"
            );
            self.metrics.record_dead_letter();
            return Route::DeadLetter(request.to_json().unwrap_or_else(|_| message.data.clone()));
        }

        debug!(stage = ?RouteStage::Submitting, "RequestRouter::route: submitting");
        let destination = request.destination(&self.project);
        let outcome = self.submitter.submit(destination, request.source_uri()).await;
        self.metrics.record_outcome(outcome.kind());

        let route = match outcome {
            SubmissionOutcome::Submitted { job, latency } => {
                self.metrics.record_submission_latency(latency);
                let envelope = LoaderEnvelope::new(request, &job);
                match envelope.to_json() {
                    Ok(json) => Route::Submitted(Message::with_dedup_token(json)),
                    Err(e) => {
                        // The job exists; re-queueing would load the data twice
                        warn!(job_id = %job.qualified_id(), error = %e, "Failed to encode envelope");
                        self.metrics.record_dead_letter();
                        Route::DeadLetter(message.data.clone())
                    }
                }
            }
            failed => {
                if let SubmissionOutcome::BackendRejected { retryable: false, .. } = &failed {
                    warn!(
                        source = %request.source_uri(),
                        "Warehouse rejected the request outright; later cycles will likely fail the same way"
                    );
                }
                let request = self.tracker.record_attempt(request);
                info!(
                    outcome = %failed.kind(),
                    attempts = request.submission_attempts(),
                    cause = failed.cause().unwrap_or_default(),
                    "Sending load request back for another cycle"
                );
                self.metrics.record_retry();
                let data = request.to_json().unwrap_or_else(|_| message.data.clone());
                Route::Retry(Message::with_dedup_token(data))
            }
        };

        debug!(stage = ?RouteStage::Routed, channel = %route.channel(), "RequestRouter::route: done");
        route
    }
}
