//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use loadgate::config::Config;
use loadgate::warehouse::{JobHandle, LoadJobSpec, WarehouseClient, WarehouseError};

/// In-memory warehouse with a settable running-job count
#[derive(Default)]
pub struct FakeWarehouse {
    running: AtomicUsize,
    list_delay_ms: AtomicUsize,
    service_error: AtomicBool,
    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
    created: Mutex<Vec<LoadJobSpec>>,
}

impl FakeWarehouse {
    pub fn running(count: usize) -> Self {
        let fake = Self::default();
        fake.running.store(count, Ordering::SeqCst);
        fake
    }

    pub fn failing_creates(self) -> Self {
        self.service_error.store(true, Ordering::SeqCst);
        self
    }

    pub fn slow_listing(self, delay: Duration) -> Self {
        self.list_delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<LoadJobSpec> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl WarehouseClient for FakeWarehouse {
    async fn list_running_jobs(&self) -> Result<Vec<JobHandle>, WarehouseError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        Ok((0..self.running.load(Ordering::SeqCst))
            .map(|i| JobHandle {
                job_id: format!("job-{}", i),
                project_id: "acme".to_string(),
                location: Some("US".to_string()),
                created: None,
            })
            .collect())
    }

    async fn create_load_job(&self, spec: &LoadJobSpec) -> Result<JobHandle, WarehouseError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.service_error.load(Ordering::SeqCst) {
            return Err(WarehouseError::Api {
                status: 503,
                message: "Service unavailable".to_string(),
            });
        }
        self.created.lock().unwrap().push(spec.clone());
        Ok(JobHandle {
            job_id: format!("bq-load_{}", call),
            project_id: spec.destination.project_id.clone(),
            location: Some("US".to_string()),
            created: chrono::DateTime::from_timestamp_millis(1_700_000_000_000),
        })
    }
}

/// Config with threshold 5, an uncached listing, and 3 backoff retries
pub fn config() -> Config {
    let mut config = Config::default();
    config.warehouse.project = "acme".to_string();
    config.throttle.concurrent_jobs_threshold = 5;
    config.throttle.running_jobs_cache_ttl_minutes = 0;
    config.throttle.max_backoff_retries = 3;
    config
}

/// A load request as it arrives on the inbound transport
pub fn request_json(source: &str, attempts: Option<u32>) -> String {
    let mut request = serde_json::json!({
        "loadRequestPayload": {
            "bundlePrefixPath": source,
            "bundleDataset": "events",
            "bundleTable": "clicks",
        },
        "loadRequestAttributes": {},
    });
    if let Some(n) = attempts {
        request["loadRequestAttributes"]["loadJobSubmissionAttempts"] = serde_json::json!(n);
    }
    request.to_string()
}
