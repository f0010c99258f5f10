//! Per-message visibility ticker
//!
//! Keeps a message's lease alive while its job runs, so slow jobs are not
//! redelivered mid-execution. The caller never needs to know the job's
//! duration in advance.

use jobpoll_core::{QueueClient, QueueMessage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

/// Safety margin subtracted from the visibility timeout to get the
/// extension interval, so each extension lands before the lease expires
pub const EXTEND_MARGIN_SECS: u32 = 5;

/// Background task renewing one message's lease
pub struct VisibilityTicker {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl VisibilityTicker {
    /// Start renewing the lease of `message` every
    /// `visibility_timeout - EXTEND_MARGIN_SECS` seconds (floor 1s),
    /// re-asserting the same `visibility_timeout` each time
    pub fn start(
        client: Arc<dyn QueueClient>,
        message: &QueueMessage,
        visibility_timeout: u32,
    ) -> Self {
        let queue_url = message.queue_url.clone();
        let receipt_handle = message.receipt_handle.clone();
        let message_id = message.message_id.clone();
        let period = Duration::from_secs(u64::from(
            visibility_timeout.saturating_sub(EXTEND_MARGIN_SECS).max(1),
        ));

        let handle = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                match client
                    .change_visibility(&queue_url, &receipt_handle, visibility_timeout)
                    .await
                {
                    Ok(()) => {
                        debug!("Extended lease of message {} by {}s", message_id, visibility_timeout);
                    }
                    Err(e) => {
                        // best effort: a missed extension only means the
                        // queue may redeliver later, which is ordinary
                        // at-least-once retry
                        warn!("Failed to extend lease of message {}: {}", message_id, e);
                    }
                }
            }
        });

        Self {
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop renewing. Idempotent; safe on an already-finished ticker.
    pub fn finish(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for VisibilityTicker {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobpoll_core::{InMemoryQueueClient, QueueOp, ReceiveOptions};

    async fn leased_message(client: &InMemoryQueueClient) -> QueueMessage {
        client.push("q", "{}");
        let opts = ReceiveOptions {
            max_messages: 1,
            visibility_timeout: 30,
            wait_time_seconds: 0,
        };
        client.receive_messages("q", &opts).await.unwrap().remove(0)
    }

    fn extension_count(client: &InMemoryQueueClient) -> usize {
        client
            .operations()
            .iter()
            .filter(|op| matches!(op, QueueOp::ChangeVisibility { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_extends_lease_periodically() {
        let client = Arc::new(InMemoryQueueClient::new());
        let message = leased_message(&client).await;

        // visibility 6s => extension every 1s
        let ticker = VisibilityTicker::start(client.clone(), &message, 6);
        tokio::time::sleep(Duration::from_millis(3100)).await;
        ticker.finish();

        assert_eq!(extension_count(&client), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_stops_extensions() {
        let client = Arc::new(InMemoryQueueClient::new());
        let message = leased_message(&client).await;

        let ticker = VisibilityTicker::start(client.clone(), &message, 6);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        ticker.finish();
        let after_finish = extension_count(&client);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(extension_count(&client), after_finish);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_is_idempotent() {
        let client = Arc::new(InMemoryQueueClient::new());
        let message = leased_message(&client).await;

        let ticker = VisibilityTicker::start(client, &message, 30);
        ticker.finish();
        ticker.finish();
        ticker.finish();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_extension_does_not_stop_ticker() {
        let client = Arc::new(InMemoryQueueClient::new());
        let message = leased_message(&client).await;

        let ticker = VisibilityTicker::start(client.clone(), &message, 6);

        client.set_fail_visibility(true);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(extension_count(&client), 0);

        // next scheduled attempts proceed normally once the queue recovers
        client.set_fail_visibility(false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        ticker.finish();

        assert!(extension_count(&client) >= 2);
    }
}
