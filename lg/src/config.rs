//! loadgate configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::throttle::ThrottleConfig;

/// Below this the retry-cycle ceiling stops acting as a circuit breaker and
/// starts dead-lettering requests during ordinary backend slowdowns.
pub const RECOMMENDED_MIN_RETRY_CYCLES: u32 = 10_000;

/// Main loadgate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Warehouse backend configuration
    pub warehouse: WarehouseConfig,

    /// Admission control and backoff
    pub throttle: ThrottleConfig,

    /// External retry cycles
    pub retry: RetryConfig,

    /// Worker pool and channel sizing
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.warehouse.project.trim().is_empty() {
            return Err(eyre::eyre!("warehouse.project must be set"));
        }
        self.throttle.validate()?;
        if self.retry.max_load_job_retry_cycles < RECOMMENDED_MIN_RETRY_CYCLES {
            tracing::warn!(
                max_load_job_retry_cycles = self.retry.max_load_job_retry_cycles,
                recommended = RECOMMENDED_MIN_RETRY_CYCLES,
                "Retry cycle ceiling is low; transient backend trouble may dead-letter requests"
            );
        }
        if self.pipeline.max_workers == 0 {
            return Err(eyre::eyre!("pipeline.max-workers must be at least 1"));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(eyre::eyre!("pipeline.channel-capacity must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::default_paths() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Errors are swallowed: the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => Some(path.clone()),
            None => Self::default_paths().into_iter().find(|p| p.exists()),
        }?;
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    /// Project-local `.loadgate.yml`, then `~/.config/loadgate/loadgate.yml`
    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".loadgate.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("loadgate").join("loadgate.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Warehouse backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Target project that receives load jobs
    pub project: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the OAuth access token
    #[serde(rename = "access-token-env")]
    pub access_token_env: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Prefix for client-generated job ids
    #[serde(rename = "job-id-prefix")]
    pub job_id_prefix: String,

    /// Job location (region), if the dataset is not in the default one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            base_url: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            access_token_env: "BIGQUERY_ACCESS_TOKEN".to_string(),
            timeout_ms: 30_000,
            job_id_prefix: "bq-load".to_string(),
            location: None,
        }
    }
}

impl WarehouseConfig {
    /// Read the access token from the configured environment variable
    pub fn get_access_token(&self) -> Result<String> {
        match std::env::var(&self.access_token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(eyre::eyre!(
                "Warehouse access token not found. Set the {} environment variable.",
                self.access_token_env
            )),
        }
    }
}

/// External retry cycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Cycles through the retry channel before a request is dead-lettered
    #[serde(rename = "max-load-job-retry-cycles")]
    pub max_load_job_retry_cycles: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_load_job_retry_cycles: RECOMMENDED_MIN_RETRY_CYCLES,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum requests processed concurrently
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Buffer size of the inbound and output channels
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 64,
            channel_capacity: 1024,
        }
    }
}
