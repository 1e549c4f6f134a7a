//! Cached view of the jobs currently running on the warehouse
//!
//! There is exactly one slot: the whole running set. It is refreshed from a
//! full listing when empty or past its TTL, and concurrent callers that miss
//! at the same time share a single in-flight refresh instead of each issuing
//! their own listing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::warehouse::{JobHandle, WarehouseClient};

/// A running-jobs listing could not be obtained
///
/// Cloneable so every caller waiting on the same refresh receives it.
#[derive(Debug, Clone, Error)]
#[error("Failed to refresh running jobs: {0}")]
pub struct RefreshError(pub String);

/// The set of running jobs at the time of the last refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunningJobs {
    /// Distinct jobs, in listing order, at most `max_size` of them
    pub jobs: Vec<JobHandle>,

    /// Distinct jobs reported by the listing, before truncation
    pub listed: usize,
}

impl RunningJobs {
    /// Deduplicate by qualified id and keep at most `max_size` handles
    pub fn collect(listing: Vec<JobHandle>, max_size: usize) -> Self {
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        for job in listing {
            if seen.insert(job.qualified_id()) && jobs.len() < max_size {
                jobs.push(job);
            }
        }
        Self {
            jobs,
            listed: seen.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<RunningJobs>, RefreshError>>>;

enum Slot {
    Empty,
    /// `expires_at` is `None` when the TTL reaches past the clock's range
    Ready {
        jobs: Arc<RunningJobs>,
        expires_at: Option<Instant>,
    },
    Refreshing { generation: u64, refresh: RefreshFuture },
}

/// Internal state protected by mutex
struct SnapshotInner {
    slot: Slot,
    generation: u64,
}

/// Single-slot, TTL-bounded cache of running warehouse jobs
pub struct RunningJobSnapshot {
    warehouse: Arc<dyn WarehouseClient>,
    max_size: usize,
    ttl: Duration,
    inner: Mutex<SnapshotInner>,
    refreshes: AtomicU64,
}

impl RunningJobSnapshot {
    /// Create an empty snapshot; the first lookup triggers a refresh
    pub fn new(warehouse: Arc<dyn WarehouseClient>, max_size: usize, ttl: Duration) -> Self {
        debug!(max_size, ttl_secs = ttl.as_secs(), "RunningJobSnapshot::new: called");
        Self {
            warehouse,
            max_size,
            ttl,
            inner: Mutex::new(SnapshotInner {
                slot: Slot::Empty,
                generation: 0,
            }),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Return the cached running set, refreshing it if empty or expired
    pub async fn running_jobs(&self) -> Result<Arc<RunningJobs>, RefreshError> {
        let (generation, refresh) = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            match &inner.slot {
                Slot::Ready { jobs, expires_at } if expires_at.is_none_or(|at| Instant::now() < at) => {
                    debug!(running = jobs.len(), "RunningJobSnapshot::running_jobs: cache hit");
                    return Ok(jobs.clone());
                }
                Slot::Refreshing { generation, refresh } => {
                    debug!(generation, "RunningJobSnapshot::running_jobs: joining in-flight refresh");
                    (*generation, refresh.clone())
                }
                _ => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    debug!(generation, "RunningJobSnapshot::running_jobs: cache miss, starting refresh");
                    let refresh = self.start_refresh(generation);
                    inner.slot = Slot::Refreshing {
                        generation,
                        refresh: refresh.clone(),
                    };
                    (generation, refresh)
                }
            }
        };

        let result = refresh.await;
        self.settle(generation, &result);
        result
    }

    /// Number of backend listings issued so far
    #[cfg(test)]
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn start_refresh(&self, generation: u64) -> RefreshFuture {
        let refreshes = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let warehouse = self.warehouse.clone();
        let max_size = self.max_size;
        async move {
            match warehouse.list_running_jobs().await {
                Ok(listing) => {
                    let running = RunningJobs::collect(listing, max_size);
                    info!(
                        generation,
                        refreshes,
                        running = running.len(),
                        listed = running.listed,
                        "Refreshed running jobs"
                    );
                    Ok(Arc::new(running))
                }
                Err(e) => {
                    warn!(generation, error = %e, "Running jobs refresh failed");
                    Err(RefreshError(e.to_string()))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Install a finished refresh, unless a newer one already replaced it
    fn settle(&self, generation: u64, result: &Result<Arc<RunningJobs>, RefreshError>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let current = matches!(&inner.slot, Slot::Refreshing { generation: g, .. } if *g == generation);
        if !current {
            return;
        }
        inner.slot = match result {
            Ok(jobs) => Slot::Ready {
                jobs: jobs.clone(),
                expires_at: Instant::now().checked_add(self.ttl),
            },
            Err(_) => Slot::Empty,
        };
    }
}
