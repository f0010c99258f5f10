//! Queue poller
//!
//! Bridges the remote queues and the executor: resolves and validates the
//! target queue set, applies the per-queue ordering policy, fans out one
//! polling task per queue, and turns OS signals into a cooperative,
//! token-based shutdown.

use crate::config::PollerConfig;
use crate::executor::JobExecutor;
use futures::future::join_all;
use jobpoll_core::{PollerError, QueueClient, ReceiveOptions, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One resolved polling target
#[derive(Debug, Clone)]
struct QueueTarget {
    name: String,
    url: String,
    opts: ReceiveOptions,
}

/// Polls one or more queues and feeds the shared executor
#[derive(Clone)]
pub struct Poller {
    config: Arc<PollerConfig>,
    client: Arc<dyn QueueClient>,
    executor: Arc<JobExecutor>,
    cancel: CancellationToken,
}

impl Poller {
    /// Create a poller sharing `executor` across all polled queues
    pub fn new(
        config: PollerConfig,
        client: Arc<dyn QueueClient>,
        executor: Arc<JobExecutor>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            client,
            executor,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the poll loops; signal handlers cancel it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll the named queues (all configured queues when empty) until
    /// interrupted or a fatal error occurs, then shut the executor down.
    ///
    /// Fails fast with [`PollerError::Configuration`] before any polling
    /// starts when a target queue is unknown or has no URL.
    pub async fn run(&self, queue_names: &[String]) -> Result<()> {
        let mut targets = self.resolve_targets(queue_names)?;

        self.spawn_signal_listener();
        self.link_fatal_errors();

        if targets.len() == 1 {
            // single queue runs in the calling task
            self.poll_loop(targets.remove(0)).await;
        } else {
            let handles: Vec<_> = targets
                .into_iter()
                .map(|target| {
                    let poller = self.clone();
                    tokio::spawn(async move { poller.poll_loop(target).await })
                })
                .collect();
            join_all(handles).await;
        }

        let timeout = self.config.worker.shutdown_timeout();
        self.executor.shutdown(timeout).await;

        if let Some(error) = self.executor.take_fatal_error() {
            return Err(PollerError::Other(format!(
                "Unhandled job error: {:#}",
                error
            )));
        }
        Ok(())
    }

    /// Resolve queue names to validated polling targets
    fn resolve_targets(&self, queue_names: &[String]) -> Result<Vec<QueueTarget>> {
        let names: Vec<String> = if queue_names.is_empty() {
            let mut all: Vec<String> = self.config.queues.keys().cloned().collect();
            all.sort();
            all
        } else {
            queue_names.to_vec()
        };

        if names.is_empty() {
            return Err(PollerError::Configuration(
                "No queues configured".to_string(),
            ));
        }

        names
            .iter()
            .map(|name| {
                let settings = self.config.queues.get(name).ok_or_else(|| {
                    PollerError::Configuration(format!("Unknown queue: {}", name))
                })?;
                let url = settings.url.clone().ok_or_else(|| {
                    PollerError::Configuration(format!("No URL configured for queue: {}", name))
                })?;
                let worker = &self.config.worker;
                let opts = ReceiveOptions::for_queue(
                    &url,
                    settings.max_messages.unwrap_or(worker.max_messages),
                    settings
                        .visibility_timeout
                        .unwrap_or(worker.visibility_timeout),
                    worker.wait_time_seconds,
                );
                Ok(QueueTarget {
                    name: name.clone(),
                    url,
                    opts,
                })
            })
            .collect()
    }

    /// Receive batches from one queue until cancelled
    ///
    /// The token is checked between batches only; in-flight receives are
    /// abandoned on cancel, never the jobs themselves.
    async fn poll_loop(&self, target: QueueTarget) {
        info!("Polling queue {} ({})", target.name, target.url);
        loop {
            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                batch = self.client.receive_messages(&target.url, &target.opts) => batch,
            };

            match batch {
                Ok(messages) => {
                    for message in messages {
                        // blocks here when the executor is at capacity,
                        // which throttles this queue's receive rate
                        self.executor
                            .execute(message, target.opts.visibility_timeout)
                            .await;
                    }
                }
                Err(e) => {
                    warn!("Receive from queue {} failed: {}", target.name, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }
        info!("Stopped polling queue {}", target.name);
    }

    /// Cancel the token on SIGINT or SIGTERM
    fn spawn_signal_listener(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            wait_for_signal(&cancel).await;
            info!("Interrupt received, shutting down");
            cancel.cancel();
        });
    }

    /// Propagate an executor fatal error into the poll loops
    fn link_fatal_errors(&self) {
        let fatal = self.executor.fatal_token();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = fatal.cancelled() => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        });
    }
}

#[cfg(unix)]
async fn wait_for_signal(cancel: &CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
                _ = cancel.cancelled() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(cancel: &CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = cancel.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::executor::ExecutorOptions;
    use jobpoll_core::{InMemoryQueueClient, JobRegistry};

    fn poller_with(config: PollerConfig) -> Poller {
        let client = Arc::new(InMemoryQueueClient::new());
        let executor = Arc::new(JobExecutor::new(
            client.clone(),
            Arc::new(JobRegistry::new()),
            ExecutorOptions::default(),
        ));
        Poller::new(config, client, executor)
    }

    fn config_with_queue(name: &str, url: Option<&str>) -> PollerConfig {
        let mut config = PollerConfig::default();
        config.worker.max_messages = 5;
        config.queues.insert(
            name.to_string(),
            QueueSettings {
                url: url.map(String::from),
                ..Default::default()
            },
        );
        config
    }

    #[tokio::test]
    async fn test_unknown_queue_fails_fast() {
        let poller = poller_with(config_with_queue("default", Some("https://q.example/q")));
        let result = poller.resolve_targets(&["missing".to_string()]);
        assert!(matches!(result, Err(PollerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_queue_without_url_fails_fast() {
        let poller = poller_with(config_with_queue("default", None));
        let result = poller.resolve_targets(&["default".to_string()]);
        assert!(matches!(result, Err(PollerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_no_queues_configured_fails_fast() {
        let poller = poller_with(PollerConfig::default());
        let result = poller.resolve_targets(&[]);
        assert!(matches!(result, Err(PollerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_defaults_to_all_configured_queues() {
        let mut config = config_with_queue("alpha", Some("https://q.example/alpha"));
        config.queues.insert(
            "beta".to_string(),
            QueueSettings {
                url: Some("https://q.example/beta".to_string()),
                ..Default::default()
            },
        );
        let poller = poller_with(config);

        let targets = poller.resolve_targets(&[]).unwrap();
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_fifo_queue_pins_batch_to_one() {
        let poller = poller_with(config_with_queue(
            "ordered",
            Some("https://q.example/my-queue.fifo"),
        ));
        let targets = poller.resolve_targets(&["ordered".to_string()]).unwrap();
        assert_eq!(targets[0].opts.max_messages, 1);
    }

    #[tokio::test]
    async fn test_standard_queue_uses_configured_batch() {
        let poller = poller_with(config_with_queue("default", Some("https://q.example/q")));
        let targets = poller.resolve_targets(&["default".to_string()]).unwrap();
        assert_eq!(targets[0].opts.max_messages, 5);
    }

    #[tokio::test]
    async fn test_per_queue_overrides_apply() {
        let mut config = config_with_queue("default", Some("https://q.example/q"));
        if let Some(settings) = config.queues.get_mut("default") {
            settings.max_messages = Some(2);
            settings.visibility_timeout = Some(120);
        }
        let poller = poller_with(config);

        let targets = poller.resolve_targets(&["default".to_string()]).unwrap();
        assert_eq!(targets[0].opts.max_messages, 2);
        assert_eq!(targets[0].opts.visibility_timeout, 120);
    }
}
