//! Bounded job executor
//!
//! Fixed worker concurrency with a bounded submission queue: `execute`
//! blocks once `workers + backpressure` messages are in flight, which is
//! the flow-control signal that slows the poller down. Job failures are
//! routed to a single long-lived error task so workers never stall on
//! error handling.

use crate::ticker::VisibilityTicker;
use async_trait::async_trait;
use jobpoll_core::{JobInvocation, JobRegistry, JobRunner, QueueClient, QueueMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A failed job execution: the raised error, the decoded invocation, and
/// the message that carried it
pub struct ErrorRecord {
    /// Error raised by the job logic
    pub error: anyhow::Error,
    /// The invocation that failed; `invocation.retried()` tells whether a
    /// caller-level retry mechanism already retried it
    pub invocation: JobInvocation,
    /// The message whose job failed; not yet deleted
    pub message: QueueMessage,
}

/// Handler invoked for each failed job, in failure order
///
/// Whether the failed job's message should be deleted (suppressing retry)
/// or left for redelivery is this handler's decision; the executor never
/// deletes a failed job's message itself.
#[async_trait]
pub trait JobErrorHandler: Send + Sync {
    async fn on_job_error(&self, record: &ErrorRecord, queue: &dyn QueueClient);
}

/// Executor construction options
pub struct ExecutorOptions {
    /// Number of concurrently executing jobs
    pub workers: usize,
    /// Additional submissions accepted beyond `workers` before `execute`
    /// blocks
    pub backpressure: usize,
    /// Handler for failed jobs; with none configured, an error is fatal
    pub error_handler: Option<Arc<dyn JobErrorHandler>>,
    /// Hooks run once at the start of the first shutdown call
    pub stop_hooks: Vec<Box<dyn FnOnce() + Send>>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            backpressure: 10,
            error_handler: None,
            stop_hooks: Vec::new(),
        }
    }
}

/// Bounded executor: worker pool, lease tickers, error pipeline, shutdown
pub struct JobExecutor {
    client: Arc<dyn QueueClient>,
    registry: Arc<JobRegistry>,
    run_slots: Arc<Semaphore>,
    submit_slots: Arc<Semaphore>,
    total_slots: usize,
    error_tx: mpsc::UnboundedSender<Option<ErrorRecord>>,
    error_task: Mutex<Option<JoinHandle<()>>>,
    stop_hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    shutting_down: Arc<AtomicBool>,
    fatal: CancellationToken,
    fatal_error: Arc<Mutex<Option<anyhow::Error>>>,
}

impl JobExecutor {
    /// Create an executor and start its error-handling task
    pub fn new(
        client: Arc<dyn QueueClient>,
        registry: Arc<JobRegistry>,
        options: ExecutorOptions,
    ) -> Self {
        let total_slots = options.workers + options.backpressure;
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let fatal = CancellationToken::new();
        let fatal_error = Arc::new(Mutex::new(None));

        let error_task = spawn_error_task(
            error_rx,
            options.error_handler,
            client.clone(),
            fatal.clone(),
            fatal_error.clone(),
        );

        Self {
            client,
            registry,
            run_slots: Arc::new(Semaphore::new(options.workers)),
            submit_slots: Arc::new(Semaphore::new(total_slots)),
            total_slots,
            error_tx,
            error_task: Mutex::new(Some(error_task)),
            stop_hooks: Mutex::new(options.stop_hooks),
            shutting_down: Arc::new(AtomicBool::new(false)),
            fatal,
            fatal_error,
        }
    }

    /// Submit a message for processing
    ///
    /// Blocks while `workers + backpressure` messages are already in
    /// flight; a completing task frees the slot that wakes this call.
    /// During shutdown the message is dropped untouched and becomes
    /// redeliverable once its lease expires.
    pub async fn execute(&self, message: QueueMessage, visibility_timeout: u32) {
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!(
                "Executor shutting down, leaving message {} to lease expiry",
                message.message_id
            );
            return;
        }

        let submit_permit = match self.submit_slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // semaphore closed, nothing in flight to wait for
        };

        // a caller blocked on backpressure may have crossed the shutdown
        // edge while waiting
        if self.shutting_down.load(Ordering::SeqCst) {
            warn!(
                "Executor shutting down, leaving message {} to lease expiry",
                message.message_id
            );
            return;
        }

        let ticker = VisibilityTicker::start(self.client.clone(), &message, visibility_timeout);
        let client = self.client.clone();
        let registry = self.registry.clone();
        let run_slots = self.run_slots.clone();
        let error_tx = self.error_tx.clone();

        tokio::spawn(async move {
            // held until the task finishes; dropping it is the completion
            // signal that wakes blocked `execute` callers
            let _submit_permit = submit_permit;
            let _run_permit = match run_slots.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    ticker.finish();
                    return;
                }
            };
            process_message(client, registry, message, ticker, error_tx).await;
        });
    }

    /// Submitted-but-not-completed message count
    pub fn in_flight(&self) -> usize {
        self.total_slots - self.submit_slots.available_permits()
    }

    /// Token cancelled when an unhandled job error makes further
    /// processing unsafe; the poller reacts by shutting down
    pub fn fatal_token(&self) -> CancellationToken {
        self.fatal.clone()
    }

    /// Take the first unhandled job error, if one occurred
    pub fn take_fatal_error(&self) -> Option<anyhow::Error> {
        self.fatal_error.lock().take()
    }

    /// Shut down: run stop hooks, stop accepting submissions, wait up to
    /// `timeout` for in-flight tasks, then drain the error channel.
    ///
    /// Returns `true` when every in-flight task finished in time. On
    /// timeout the remaining tasks keep running detached and their
    /// messages stay leased until natural expiry; forcing a delete or
    /// release here could double-process a job that is still running.
    /// Safe to call concurrently; hooks run exactly once.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let first_call = !self.shutting_down.swap(true, Ordering::SeqCst);
        if first_call {
            info!("Executor shutting down (timeout: {:?})", timeout);
            let hooks: Vec<_> = self.stop_hooks.lock().drain(..).collect();
            for hook in hooks {
                hook();
            }
        }

        let deadline = Instant::now() + timeout;
        let clean = loop {
            let in_flight = self.in_flight();
            if in_flight == 0 {
                break true;
            }
            if Instant::now() >= deadline {
                warn!(
                    "Shutdown timeout reached, {} tasks still in flight; \
                     their messages stay leased until expiry",
                    in_flight
                );
                break false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        };

        // sentinel, then join: all errors produced so far are processed
        // before shutdown returns
        let _ = self.error_tx.send(None);
        let handle = self.error_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        if clean {
            info!("Executor shutdown complete");
        }
        clean
    }
}

/// Per-task protocol: decode, run, then delete or route the failure
async fn process_message(
    client: Arc<dyn QueueClient>,
    registry: Arc<JobRegistry>,
    message: QueueMessage,
    ticker: VisibilityTicker,
    error_tx: mpsc::UnboundedSender<Option<ErrorRecord>>,
) {
    let runner = match JobRunner::from_message(&message, registry) {
        Ok(runner) => runner,
        Err(e) => {
            // left on the queue: a malformed message redelivers and fails
            // identically until retention or a dead-letter policy removes
            // it, keeping the bad payload visible to operators
            error!(
                "Failed to decode message {}: {} (left on queue)",
                message.message_id, e
            );
            ticker.finish();
            return;
        }
    };

    debug!("Executing job {} ({})", runner.id(), runner.class_name());
    match runner.run().await {
        Ok(()) => {
            // ticker stops first so no extension can fire after the delete
            ticker.finish();
            info!("Job {} ({}) completed", runner.id(), runner.class_name());
            if let Err(e) = client
                .delete_message(&message.queue_url, &message.receipt_handle)
                .await
            {
                warn!("Failed to delete message {}: {}", message.message_id, e);
            }
        }
        Err(error) => {
            ticker.finish();
            info!(
                "Job {} ({}) raised: {}",
                runner.id(),
                runner.class_name(),
                error
            );
            let _ = error_tx.send(Some(ErrorRecord {
                error,
                invocation: runner.invocation().clone(),
                message,
            }));
        }
    }
}

/// Single consumer of the error channel, strictly in arrival order
fn spawn_error_task(
    mut error_rx: mpsc::UnboundedReceiver<Option<ErrorRecord>>,
    handler: Option<Arc<dyn JobErrorHandler>>,
    client: Arc<dyn QueueClient>,
    fatal: CancellationToken,
    fatal_error: Arc<Mutex<Option<anyhow::Error>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = error_rx.recv().await {
            let Some(record) = item else {
                break; // sentinel: clean termination
            };
            match &handler {
                Some(handler) => {
                    handler.on_job_error(&record, client.as_ref()).await;
                }
                None => {
                    // fail fast rather than loop silently over failing jobs
                    error!(
                        "Unhandled job error for message {}: {:#}; shutting down",
                        record.message.message_id, record.error
                    );
                    *fatal_error.lock() = Some(record.error);
                    fatal.cancel();
                    break;
                }
            }
        }
    })
}
