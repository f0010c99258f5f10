//! Poller configuration
//!
//! File and environment settings deserialize into explicit typed structs;
//! CLI overrides are applied field by field.

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Complete poller configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PollerConfig {
    /// Executor and polling settings
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Named queues, with optional per-queue overrides
    #[serde(default)]
    pub queues: HashMap<String, QueueSettings>,
    /// Monitoring settings
    #[serde(default)]
    pub monitoring: MonitoringSettings,
}

/// Executor and polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Number of concurrently executing jobs
    pub workers: usize,
    /// Submissions accepted beyond `workers` before polling blocks
    pub backpressure: usize,
    /// Messages per receive call (pinned to 1 on FIFO queues)
    pub max_messages: u32,
    /// Lease duration in seconds for received messages
    pub visibility_timeout: u32,
    /// Long-poll wait time in seconds
    pub wait_time_seconds: u32,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

/// Per-queue settings; unset fields fall back to [`WorkerSettings`]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueSettings {
    /// Queue URL; polling a queue without one is a configuration error
    pub url: Option<String>,
    /// Batch size override
    pub max_messages: Option<u32>,
    /// Lease duration override in seconds
    pub visibility_timeout: Option<u32>,
}

/// Monitoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            backpressure: 10,
            max_messages: 10,
            visibility_timeout: 60,
            wait_time_seconds: 20,
            shutdown_timeout_secs: 15,
        }
    }
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl PollerConfig {
    /// Load configuration: defaults, then file (optional), then
    /// environment variables prefixed `JOBPOLL`
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(Config::try_from(&PollerConfig::default())?)
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("JOBPOLL").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Apply CLI overrides onto the loaded configuration
    pub fn apply_args(&mut self, args: &PollerArgs) {
        if let Some(workers) = args.workers {
            self.worker.workers = workers;
        }
        if let Some(backpressure) = args.backpressure {
            self.worker.backpressure = backpressure;
        }
        if let Some(max_messages) = args.max_messages {
            self.worker.max_messages = max_messages;
        }
        if let Some(visibility_timeout) = args.visibility_timeout {
            self.worker.visibility_timeout = visibility_timeout;
        }
        if let Some(wait_time_seconds) = args.wait_time_seconds {
            self.worker.wait_time_seconds = wait_time_seconds;
        }
        if let Some(shutdown_timeout) = args.shutdown_timeout {
            self.worker.shutdown_timeout_secs = shutdown_timeout;
        }
        if let Some(log_level) = &args.log_level {
            self.monitoring.log_level = log_level.clone();
        }
    }
}

impl WorkerSettings {
    /// Shutdown timeout as a duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "jobpoll", about = "Queue-backed job poller", version)]
pub struct PollerArgs {
    /// Queues to poll; all configured queues when omitted
    pub queues: Vec<String>,

    /// Configuration file (without extension)
    #[arg(short, long, env = "JOBPOLL_CONFIG", default_value = "jobpoll")]
    pub config: String,

    /// Number of concurrently executing jobs
    #[arg(long, env = "JOBPOLL_WORKERS")]
    pub workers: Option<usize>,

    /// Pending submissions accepted before polling blocks
    #[arg(long)]
    pub backpressure: Option<usize>,

    /// Messages per receive call
    #[arg(long)]
    pub max_messages: Option<u32>,

    /// Lease duration in seconds
    #[arg(long)]
    pub visibility_timeout: Option<u32>,

    /// Long-poll wait time in seconds
    #[arg(long)]
    pub wait_time_seconds: Option<u32>,

    /// Graceful shutdown timeout in seconds
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    pub log_level: Option<String>,

    /// Seed this many demo jobs onto each polled queue (dev runner)
    #[arg(long)]
    pub demo_jobs: Option<u32>,
}
