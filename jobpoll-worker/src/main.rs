//! Jobpoll - Main entry point
//!
//! Dev runner: polls an in-memory queue with the demo handlers below.
//! Real deployments implement [`jobpoll_core::QueueClient`] for their
//! queue transport and drive [`Poller`] from their own binary.

use clap::Parser;
use jobpoll_core::{FnJobHandler, InMemoryQueueClient, JobRegistry};
use jobpoll_worker::config::{PollerArgs, PollerConfig};
use jobpoll_worker::executor::{ExecutorOptions, JobExecutor};
use jobpoll_worker::poller::Poller;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = PollerArgs::parse();

    let mut config = PollerConfig::load(&args.config)?;
    config.apply_args(&args);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.monitoring.log_level.clone()));
    fmt().with_env_filter(env_filter).json().init();

    info!(
        "Starting jobpoll (workers: {}, backpressure: {}, max_messages: {})",
        config.worker.workers, config.worker.backpressure, config.worker.max_messages
    );

    let client = Arc::new(InMemoryQueueClient::new());
    if let Some(count) = args.demo_jobs {
        seed_demo_jobs(&client, &config, &args.queues, count);
    }

    let registry = Arc::new(demo_registry());
    let executor = Arc::new(JobExecutor::new(
        client.clone(),
        registry,
        ExecutorOptions {
            workers: config.worker.workers,
            backpressure: config.worker.backpressure,
            ..Default::default()
        },
    ));

    let poller = Poller::new(config, client, executor);
    poller.run(&args.queues).await?;

    info!("Shutdown complete");
    Ok(())
}

/// Handlers for trying the poller out locally
fn demo_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register(FnJobHandler::new("EchoJob", |invocation| {
        Box::pin(async move {
            info!(
                "EchoJob {}: {:?}",
                invocation.job_id, invocation.arguments
            );
            Ok(())
        })
    }));
    registry.register(FnJobHandler::new("SleepJob", |invocation| {
        Box::pin(async move {
            let millis = invocation
                .arguments
                .first()
                .and_then(|v| v.as_u64())
                .unwrap_or(1000);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(())
        })
    }));
    registry.register(FnJobHandler::new("FailJob", |invocation| {
        Box::pin(async move {
            Err(anyhow::anyhow!(
                "FailJob {} failed as requested",
                invocation.job_id
            ))
        })
    }));
    registry
}

/// Seed EchoJob messages onto each queue the run will poll
fn seed_demo_jobs(
    client: &InMemoryQueueClient,
    config: &PollerConfig,
    queue_names: &[String],
    count: u32,
) {
    let names: Vec<&String> = if queue_names.is_empty() {
        config.queues.keys().collect()
    } else {
        queue_names.iter().collect()
    };
    for name in names {
        let Some(url) = config.queues.get(name).and_then(|q| q.url.as_ref()) else {
            continue;
        };
        for i in 0..count {
            let body = serde_json::json!({
                "job_id": format!("demo-{}-{}", name, i),
                "job_class": "EchoJob",
                "arguments": [i],
                "executions": 0,
            });
            client.push(url, body.to_string());
        }
        info!("Seeded {} demo jobs onto queue {}", count, name);
    }
}
