//! Jobpoll Core Library
//!
//! This library provides the core data structures and contracts for the
//! queue-backed job poller: the message lease handle, the job invocation
//! envelope, the queue client trait, and the handler registry.

pub mod dedup;
pub mod error;
pub mod job;
pub mod memory;
pub mod message;
pub mod queue;

pub use dedup::*;
pub use error::*;
pub use job::*;
pub use memory::*;
pub use message::*;
pub use queue::*;
