//! lg - loadgate command-line entry point
//!
//! Routes batches of load requests through warehouse admission control.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use loadgate::cli::{Cli, Command, OutputFormat};
use loadgate::config::Config;
use loadgate::metrics::MetricsSnapshot;
use loadgate::pipeline::{DEAD_LETTER_FILE, PipelineSummary, RETRY_FILE, SUBMITTED_FILE, process_files};
use loadgate::throttle::{RunningJobSnapshot, has_capacity};
use loadgate::warehouse::{BigQueryClient, WarehouseClient};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loadgate")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("loadgate.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Process {
            input,
            output_dir,
            format,
        } => cmd_process(&config, &input, &output_dir, format).await,
        Command::Jobs { format } => cmd_jobs(&config, format).await,
        Command::Config { format } => cmd_config(&config, format),
    }
}

fn connect(config: &Config) -> Result<Arc<dyn WarehouseClient>> {
    config.validate().context("Invalid configuration")?;
    let client = BigQueryClient::from_config(&config.warehouse).context("Failed to create warehouse client")?;
    Ok(Arc::new(client))
}

async fn cmd_process(config: &Config, input: &Path, output_dir: &Path, format: OutputFormat) -> Result<()> {
    debug!(input = %input.display(), output_dir = %output_dir.display(), ?format, "cmd_process: called");
    let warehouse = connect(config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cutting backoff waits short");
            on_signal.cancel();
        }
    });

    let (summary, metrics) = process_files(config, warehouse, input, output_dir, cancel).await?;

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "summary": summary,
                "metrics": metrics,
                "output-dir": output_dir.display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_process_report(&summary, &metrics, output_dir),
    }
    Ok(())
}

fn print_process_report(summary: &PipelineSummary, metrics: &MetricsSnapshot, output_dir: &Path) {
    println!("{}", "loadgate run".bold());
    println!("Received:       {}", summary.received);
    println!(
        "Submitted:      {}  -> {}",
        summary.submitted.to_string().green(),
        output_dir.join(SUBMITTED_FILE).display()
    );
    println!(
        "Retry:          {}  -> {}",
        summary.retried.to_string().yellow(),
        output_dir.join(RETRY_FILE).display()
    );
    println!(
        "Dead-lettered:  {}  -> {}",
        summary.dead_lettered.to_string().red(),
        output_dir.join(DEAD_LETTER_FILE).display()
    );
    println!();
    println!("Backoff exhausted:    {}", metrics.backoff_exhausted);
    println!("Backend rejected:     {}", metrics.backend_rejected);
    println!("Backoff interrupted:  {}", metrics.backoff_interrupted);
    println!("Malformed:            {}", metrics.malformed);
    let latency = &metrics.submission_latency_ms;
    if latency.count > 0 {
        println!(
            "Submission latency:   mean {:.0}ms, min {}ms, max {}ms",
            latency.mean_ms(),
            latency.min_ms,
            latency.max_ms
        );
    }
}

async fn cmd_jobs(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_jobs: called");
    let warehouse = connect(config)?;
    let threshold = config.throttle.concurrent_jobs_threshold;

    let snapshot = RunningJobSnapshot::new(warehouse, usize::MAX, config.throttle.cache_ttl());
    let running = snapshot.running_jobs().await?;
    let open = has_capacity(running.listed, threshold);

    match format {
        OutputFormat::Json => {
            let jobs: Vec<_> = running
                .jobs
                .iter()
                .map(|job| {
                    serde_json::json!({
                        "job-id": job.qualified_id(),
                        "created": job.created,
                    })
                })
                .collect();
            let report = serde_json::json!({
                "running": running.listed,
                "threshold": threshold,
                "has-capacity": open,
                "jobs": jobs,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            let gate = if open { "open".green() } else { "full".red() };
            println!("Running jobs: {} / {} ({})", running.listed, threshold, gate);
            if running.is_empty() {
                println!("  {}", "no running jobs".dimmed());
            }
            for job in &running.jobs {
                let created = job
                    .created
                    .map(|c| c.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("  {}  {}", job.qualified_id(), created.dimmed());
            }
        }
    }
    Ok(())
}

fn cmd_config(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_config: called");
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", serde_yaml::to_string(config)?),
    }
    Ok(())
}
