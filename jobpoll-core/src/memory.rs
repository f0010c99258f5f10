//! In-memory queue client
//!
//! A process-local [`QueueClient`] with lease bookkeeping, used by the dev
//! runner binary and by tests. Received messages move to an in-flight map
//! keyed by receipt handle; deleting consumes the receipt, and changing
//! visibility to zero returns the message to the front of the queue
//! (immediate redelivery with a fresh receipt).

use crate::error::{PollerError, Result};
use crate::message::{queue_is_fifo, QueueMessage, ReceiveOptions};
use crate::queue::QueueClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// One recorded queue operation, for test assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    /// A receive call returned this many messages
    Receive { queue_url: String, returned: usize },
    /// A message was deleted
    Delete {
        queue_url: String,
        receipt_handle: String,
    },
    /// A message's lease was extended
    ChangeVisibility {
        queue_url: String,
        receipt_handle: String,
        visibility_timeout: u32,
    },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    receive_count: u32,
}

#[derive(Default)]
struct QueueState {
    available: VecDeque<StoredMessage>,
    in_flight: HashMap<String, StoredMessage>,
}

/// In-memory queue client with an operation log
#[derive(Default)]
pub struct InMemoryQueueClient {
    queues: Mutex<HashMap<String, QueueState>>,
    ops: Mutex<Vec<QueueOp>>,
    fail_visibility: AtomicBool,
}

impl InMemoryQueueClient {
    /// Create an empty client
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message body onto a queue
    pub fn push(&self, queue_url: &str, body: impl Into<String>) -> String {
        let message_id = Uuid::new_v4().to_string();
        let mut queues = self.queues.lock();
        queues
            .entry(queue_url.to_string())
            .or_default()
            .available
            .push_back(StoredMessage {
                message_id: message_id.clone(),
                body: body.into(),
                receive_count: 0,
            });
        message_id
    }

    /// Make every change-visibility call fail, for lease-failure tests
    pub fn set_fail_visibility(&self, fail: bool) {
        self.fail_visibility.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all recorded operations, in call order
    pub fn operations(&self) -> Vec<QueueOp> {
        self.ops.lock().clone()
    }

    /// Receipt handles deleted so far, in call order
    pub fn deleted_receipts(&self) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                QueueOp::Delete { receipt_handle, .. } => Some(receipt_handle.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of messages still on a queue (available or leased)
    pub fn remaining(&self, queue_url: &str) -> usize {
        let queues = self.queues.lock();
        queues
            .get(queue_url)
            .map(|q| q.available.len() + q.in_flight.len())
            .unwrap_or(0)
    }

    fn record(&self, op: QueueOp) {
        self.ops.lock().push(op);
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    async fn receive_messages(
        &self,
        queue_url: &str,
        opts: &ReceiveOptions,
    ) -> Result<Vec<QueueMessage>> {
        let mut received = Vec::new();
        {
            let mut queues = self.queues.lock();
            let state = queues.entry(queue_url.to_string()).or_default();
            // a FIFO queue serializes delivery within the group: at most
            // one message out per receive, and nothing while a previously
            // received message is still in flight
            let limit = if queue_is_fifo(queue_url) {
                if state.in_flight.is_empty() {
                    1
                } else {
                    0
                }
            } else {
                opts.max_messages as usize
            };
            while received.len() < limit {
                let Some(mut stored) = state.available.pop_front() else {
                    break;
                };
                stored.receive_count += 1;
                let receipt_handle = Uuid::new_v4().to_string();
                received.push(
                    QueueMessage::new(
                        queue_url,
                        stored.message_id.clone(),
                        receipt_handle.clone(),
                        stored.body.clone(),
                    )
                    .with_receive_count(stored.receive_count),
                );
                state.in_flight.insert(receipt_handle, stored);
            }
        }
        self.record(QueueOp::Receive {
            queue_url: queue_url.to_string(),
            returned: received.len(),
        });
        if received.is_empty() && opts.wait_time_seconds > 0 {
            // emulate a long poll that came back empty
            tokio::time::sleep(Duration::from_millis(u64::from(opts.wait_time_seconds) * 10))
                .await;
        }
        Ok(received)
    }

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<()> {
        let removed = {
            let mut queues = self.queues.lock();
            queues
                .get_mut(queue_url)
                .and_then(|state| state.in_flight.remove(receipt_handle))
        };
        if removed.is_none() {
            return Err(PollerError::Queue(format!(
                "Unknown receipt handle: {}",
                receipt_handle
            )));
        }
        self.record(QueueOp::Delete {
            queue_url: queue_url.to_string(),
            receipt_handle: receipt_handle.to_string(),
        });
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: u32,
    ) -> Result<()> {
        if self.fail_visibility.load(Ordering::SeqCst) {
            return Err(PollerError::Queue(
                "simulated visibility failure".to_string(),
            ));
        }
        self.record(QueueOp::ChangeVisibility {
            queue_url: queue_url.to_string(),
            receipt_handle: receipt_handle.to_string(),
            visibility_timeout,
        });
        if visibility_timeout == 0 {
            // lease released: put the message back for immediate redelivery
            let mut queues = self.queues.lock();
            if let Some(state) = queues.get_mut(queue_url) {
                if let Some(stored) = state.in_flight.remove(receipt_handle) {
                    state.available.push_front(stored);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(max: u32) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: max,
            visibility_timeout: 30,
            wait_time_seconds: 0,
        }
    }

    #[tokio::test]
    async fn test_receive_and_delete() {
        let client = InMemoryQueueClient::new();
        client.push("q", "body-1");
        client.push("q", "body-2");

        let batch = client.receive_messages("q", &opts(10)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].body, "body-1");
        assert_eq!(batch[0].receive_count, 1);

        client
            .delete_message("q", &batch[0].receipt_handle)
            .await
            .unwrap();
        assert_eq!(client.remaining("q"), 1);
    }

    #[tokio::test]
    async fn test_batch_respects_max_messages() {
        let client = InMemoryQueueClient::new();
        for i in 0..5 {
            client.push("q", format!("body-{}", i));
        }

        let batch = client.receive_messages("q", &opts(2)).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_release_redelivers_with_fresh_receipt() {
        let client = InMemoryQueueClient::new();
        client.push("q", "body");

        let first = client.receive_messages("q", &opts(1)).await.unwrap();
        client
            .change_visibility("q", &first[0].receipt_handle, 0)
            .await
            .unwrap();

        let second = client.receive_messages("q", &opts(1)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
        assert_eq!(second[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_fifo_withholds_until_in_flight_message_resolves() {
        let url = "https://q.example/q.fifo";
        let client = InMemoryQueueClient::new();
        client.push(url, "first");
        client.push(url, "second");

        let batch = client.receive_messages(url, &opts(10)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "first");

        // second message is withheld while the first is in flight
        let withheld = client.receive_messages(url, &opts(10)).await.unwrap();
        assert!(withheld.is_empty());

        client
            .delete_message(url, &batch[0].receipt_handle)
            .await
            .unwrap();
        let next = client.receive_messages(url, &opts(10)).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].body, "second");
    }

    #[tokio::test]
    async fn test_delete_unknown_receipt() {
        let client = InMemoryQueueClient::new();
        let result = client.delete_message("q", "bogus").await;
        assert!(matches!(result, Err(PollerError::Queue(_))));
    }
}
