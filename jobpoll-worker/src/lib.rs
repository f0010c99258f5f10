//! Jobpoll Worker
//!
//! Polls remote queues and executes jobs with bounded concurrency,
//! per-message lease renewal, async error routing, and graceful shutdown.

pub mod config;
pub mod executor;
pub mod poller;
pub mod ticker;

pub use config::{PollerArgs, PollerConfig};
pub use executor::{ErrorRecord, ExecutorOptions, JobErrorHandler, JobExecutor};
pub use poller::Poller;
pub use ticker::VisibilityTicker;
