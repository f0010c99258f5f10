//! Remote queue client contract
//!
//! The queue service is consumed as an opaque collaborator with
//! at-least-once, best-effort-ordered delivery. Transports implement this
//! trait; the poller and executor only ever see the trait object.

use crate::error::Result;
use crate::message::{QueueMessage, ReceiveOptions};
use async_trait::async_trait;

/// Client for a remote queue with lease (visibility timeout) semantics
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Receive up to `opts.max_messages` messages from a queue, leasing
    /// each for `opts.visibility_timeout` seconds. Blocking long poll;
    /// an empty vec means no messages arrived within the wait time.
    async fn receive_messages(
        &self,
        queue_url: &str,
        opts: &ReceiveOptions,
    ) -> Result<Vec<QueueMessage>>;

    /// Delete a message using its current receipt handle
    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<()>;

    /// Extend a message's lease by `visibility_timeout` seconds from now
    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: u32,
    ) -> Result<()>;
}
