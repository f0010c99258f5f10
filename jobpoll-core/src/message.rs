//! Message lease handle and receive options

use serde::{Deserialize, Serialize};

/// Suffix identifying a queue with strict-order (FIFO) delivery semantics
pub const FIFO_SUFFIX: &str = ".fifo";

/// A received queue message: the lease handle for one unit of work
///
/// The receipt handle is only valid for the current receive; every
/// redelivery of the same message carries a fresh one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// URL of the queue the message was received from
    pub queue_url: String,
    /// Stable message identifier assigned by the queue
    pub message_id: String,
    /// Receipt handle for this receive (delete/visibility operations)
    pub receipt_handle: String,
    /// Opaque serialized job body
    pub body: String,
    /// How many times the message has been received (1 on first delivery)
    pub receive_count: u32,
}

impl QueueMessage {
    /// Create a message handle
    pub fn new(
        queue_url: impl Into<String>,
        message_id: impl Into<String>,
        receipt_handle: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            queue_url: queue_url.into(),
            message_id: message_id.into(),
            receipt_handle: receipt_handle.into(),
            body: body.into(),
            receive_count: 1,
        }
    }

    /// Set the receive count
    pub fn with_receive_count(mut self, receive_count: u32) -> Self {
        self.receive_count = receive_count;
        self
    }

    /// Whether the originating queue is a strict-order (FIFO) queue
    pub fn is_fifo(&self) -> bool {
        queue_is_fifo(&self.queue_url)
    }
}

/// Whether a queue URL denotes strict-order (FIFO) delivery semantics
pub fn queue_is_fifo(queue_url: &str) -> bool {
    queue_url.ends_with(FIFO_SUFFIX)
}

/// Options for a single receive call
///
/// Deletion is never automatic: every received message stays on the queue
/// (invisible for `visibility_timeout` seconds) until explicitly deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveOptions {
    /// Maximum number of messages returned per receive
    pub max_messages: u32,
    /// Lease duration in seconds for received messages
    pub visibility_timeout: u32,
    /// Long-poll wait time in seconds
    pub wait_time_seconds: u32,
}

impl ReceiveOptions {
    /// Create receive options for a queue, pinning the batch size to 1
    /// for FIFO queues so delivery stays strictly one-at-a-time
    pub fn for_queue(
        queue_url: &str,
        max_messages: u32,
        visibility_timeout: u32,
        wait_time_seconds: u32,
    ) -> Self {
        let max_messages = if queue_is_fifo(queue_url) { 1 } else { max_messages };
        Self {
            max_messages,
            visibility_timeout,
            wait_time_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_detection() {
        assert!(queue_is_fifo("https://q.example/my-queue.fifo"));
        assert!(!queue_is_fifo("https://q.example/my-queue"));
    }

    #[test]
    fn test_fifo_batch_pinned_to_one() {
        let opts = ReceiveOptions::for_queue("https://q.example/my-queue.fifo", 5, 60, 20);
        assert_eq!(opts.max_messages, 1);
    }

    #[test]
    fn test_standard_batch_honored() {
        let opts = ReceiveOptions::for_queue("https://q.example/my-queue", 5, 60, 20);
        assert_eq!(opts.max_messages, 5);
        assert_eq!(opts.visibility_timeout, 60);
    }
}
