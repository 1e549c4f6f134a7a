//! loadgate - admission control for warehouse bulk-load jobs
//!
//! loadgate sits between a message transport carrying load requests and a
//! data warehouse with a hard ceiling on concurrently running jobs. Each
//! request is either submitted as a load job, sent back for another retry
//! cycle, or dead-lettered.
//!
//! # Core Concepts
//!
//! - **Cached running-job view**: one listing call per TTL, shared by all waiters
//! - **Advisory gate**: admission compares the cached count to a threshold
//! - **Exponential backoff**: a full gate is retried with growing delays
//! - **Retry cycles**: attempts are counted on the request itself and capped
//!
//! # Modules
//!
//! - [`warehouse`] - Warehouse client trait and BigQuery implementation
//! - [`throttle`] - Running-job snapshot, gate, backoff, and submitter
//! - [`router`] - Per-message routing to submitted, retry, or dead-letter
//! - [`pipeline`] - Bounded worker pool and JSON-lines transport
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod pipeline;
pub mod router;
pub mod throttle;
pub mod warehouse;

// Re-export commonly used types
pub use config::{Config, PipelineConfig, RetryConfig, WarehouseConfig};
pub use domain::{LoadRequest, LoaderEnvelope, Message};
pub use metrics::{LoaderMetrics, MetricsSnapshot};
pub use pipeline::{Pipeline, PipelineSummary, process_files};
pub use router::{Channel, Outputs, RequestRouter, RetryCycleTracker, Route};
pub use throttle::{
    AdmissionGate, BackoffPolicy, CapacityError, JobSubmitter, RefreshFailurePolicy, RunningJobSnapshot,
    SubmissionOutcome, ThrottleConfig,
};
pub use warehouse::{BigQueryClient, JobHandle, LoadJobSpec, TableRef, WarehouseClient, WarehouseError};
