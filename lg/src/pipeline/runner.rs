//! Pipeline: bounded worker pool between the inbound reader and the output writers

use std::path::Path;
use std::sync::Arc;

use eyre::{Context, Result};
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sink::{DEAD_LETTER_FILE, RETRY_FILE, SUBMITTED_FILE, write_dead_letters, write_messages};
use super::source::{open_input, read_messages};
use crate::config::Config;
use crate::domain::Message;
use crate::metrics::{LoaderMetrics, MetricsSnapshot};
use crate::router::{Channel, Outputs, RequestRouter, RetryCycleTracker};
use crate::throttle::JobSubmitter;
use crate::warehouse::WarehouseClient;

/// Per-channel counts for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineSummary {
    pub received: u64,
    pub submitted: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

impl PipelineSummary {
    fn tally(&mut self, channel: Channel) {
        match channel {
            Channel::Submitted => self.submitted += 1,
            Channel::Retry => self.retried += 1,
            Channel::DeadLetter => self.dead_lettered += 1,
        }
    }

    pub fn routed(&self) -> u64 {
        self.submitted + self.retried + self.dead_lettered
    }
}

/// Runs every inbound message through the router with at most `max_workers`
/// messages in flight
pub struct Pipeline {
    router: Arc<RequestRouter>,
    max_workers: usize,
    semaphore: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(router: Arc<RequestRouter>, max_workers: usize) -> Self {
        debug!(max_workers, "Pipeline::new: called");
        Self {
            router,
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Wire a router for `warehouse` from configuration
    pub fn from_config(config: &Config, warehouse: Arc<dyn WarehouseClient>, cancel: CancellationToken) -> Self {
        let submitter = JobSubmitter::from_config(warehouse, &config.throttle).with_cancellation(cancel);
        let router = RequestRouter::new(
            config.warehouse.project.clone(),
            RetryCycleTracker::new(config.retry.max_load_job_retry_cycles),
            Arc::new(submitter),
            Arc::new(LoaderMetrics::new()),
        );
        Self::new(Arc::new(router), config.pipeline.max_workers)
    }

    pub fn metrics(&self) -> &Arc<LoaderMetrics> {
        self.router.metrics()
    }

    /// Drain `inbound`, emitting exactly one route per message
    ///
    /// Returns once the inbound channel is closed and every worker finished.
    /// Dropping `outputs` at the end closes the output channels.
    pub async fn run(&self, mut inbound: mpsc::Receiver<Message>, outputs: Outputs) -> Result<PipelineSummary> {
        debug!(max_workers = self.max_workers, "Pipeline::run: called");
        let mut summary = PipelineSummary::default();
        let mut workers = JoinSet::new();

        while let Some(message) = inbound.recv().await {
            summary.received += 1;
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .context("Worker pool closed")?;
            let router = self.router.clone();
            let outputs = outputs.clone();

            workers.spawn(async move {
                let _permit = permit;
                let route = router.route(&message).await;
                let channel = route.channel();
                outputs.emit(route).await.map(|_| channel)
            });

            while let Some(joined) = workers.try_join_next() {
                summary.tally(joined.context("Worker task failed")??);
            }
        }

        while let Some(joined) = workers.join_next().await {
            summary.tally(joined.context("Worker task failed")??);
        }

        info!(
            received = summary.received,
            submitted = summary.submitted,
            retried = summary.retried,
            dead_lettered = summary.dead_lettered,
            "Pipeline drained"
        );
        Ok(summary)
    }
}

/// Read `input` (a path, or `-` for stdin), route every message, and write
/// the three output files into `output_dir`
pub async fn process_files(
    config: &Config,
    warehouse: Arc<dyn WarehouseClient>,
    input: &Path,
    output_dir: &Path,
    cancel: CancellationToken,
) -> Result<(PipelineSummary, MetricsSnapshot)> {
    debug!(input = %input.display(), output_dir = %output_dir.display(), "process_files: called");
    tokio::fs::create_dir_all(output_dir)
        .await
        .context(format!("Failed to create output directory {}", output_dir.display()))?;

    let capacity = config.pipeline.channel_capacity;
    let pipeline = Pipeline::from_config(config, warehouse, cancel);
    let (outputs, receivers) = Outputs::channel(capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

    let submitted_path = output_dir.join(SUBMITTED_FILE);
    let retry_path = output_dir.join(RETRY_FILE);
    let dead_letter_path = output_dir.join(DEAD_LETTER_FILE);
    let submitted_writer = tokio::spawn(async move { write_messages(receivers.submitted, &submitted_path).await });
    let retry_writer = tokio::spawn(async move { write_messages(receivers.retry, &retry_path).await });
    let dead_letter_writer =
        tokio::spawn(async move { write_dead_letters(receivers.dead_letter, &dead_letter_path).await });

    let reader = open_input(input).await?;
    let source = tokio::spawn(async move { read_messages(reader, inbound_tx).await });

    let run_result = pipeline.run(inbound_rx, outputs).await;

    let read = source.await.context("Input reader task failed")?;
    let written = [
        submitted_writer.await.context("Submitted writer task failed")?,
        retry_writer.await.context("Retry writer task failed")?,
        dead_letter_writer.await.context("Dead-letter writer task failed")?,
    ];

    let summary = run_result?;
    read?;
    for result in written {
        result?;
    }

    if summary.routed() != summary.received {
        warn!(
            received = summary.received,
            routed = summary.routed(),
            "Routed count does not match received count"
        );
    }
    Ok((summary, pipeline.metrics().snapshot()))
}
