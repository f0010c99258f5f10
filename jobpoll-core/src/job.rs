//! Job invocation envelope, handler registry, and runner

use crate::error::{PollerError, Result};
use crate::message::QueueMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A decoded job invocation
///
/// Constructed fresh from every message receipt and discarded once
/// execution finishes; never reused across redeliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInvocation {
    /// Unique job identifier
    pub job_id: String,
    /// Job type name used to look up the handler
    pub job_class: String,
    /// Positional job arguments
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
    /// Number of completed execution attempts before this one
    #[serde(default)]
    pub executions: u32,
    /// When the job was enqueued, if the producer recorded it
    #[serde(default)]
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl JobInvocation {
    /// Decode a message body into a job invocation
    ///
    /// Fails with [`PollerError::Decode`] on malformed input.
    pub fn decode(body: &str) -> Result<Self> {
        let invocation: JobInvocation = serde_json::from_str(body)?;
        if invocation.job_class.is_empty() {
            return Err(PollerError::Decode("job_class is empty".to_string()));
        }
        Ok(invocation)
    }

    /// Whether a caller-level retry mechanism already retried this job
    pub fn retried(&self) -> bool {
        self.executions > 0
    }
}

/// Helper type for boxed async handler return
pub type HandlerFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Trait for job handlers
///
/// Implement this trait to define the business logic executed for a job
/// class. Handlers are registered with a [`JobRegistry`] before the poller
/// starts.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job
    async fn perform(&self, invocation: &JobInvocation) -> anyhow::Result<()>;

    /// Get the job class name this handler handles
    fn job_class(&self) -> &str;
}

/// Job handler backed by an async closure
pub struct FnJobHandler {
    job_class: String,
    handler: Arc<dyn Fn(JobInvocation) -> HandlerFuture + Send + Sync>,
}

impl FnJobHandler {
    /// Create a handler from an async function
    pub fn new<F>(job_class: impl Into<String>, handler: F) -> Self
    where
        F: Fn(JobInvocation) -> HandlerFuture + Send + Sync + 'static,
    {
        Self {
            job_class: job_class.into(),
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl JobHandler for FnJobHandler {
    async fn perform(&self, invocation: &JobInvocation) -> anyhow::Result<()> {
        (self.handler)(invocation.clone()).await
    }

    fn job_class(&self) -> &str {
        &self.job_class
    }
}

/// Registry mapping job class names to their handlers
///
/// Populated once during startup, then shared read-only across workers.
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Box<dyn JobHandler>>,
}

impl JobRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job handler
    pub fn register<H>(&mut self, handler: H)
    where
        H: JobHandler + 'static,
    {
        let job_class = handler.job_class().to_string();
        debug!("Registered handler for job class: {}", job_class);
        self.handlers.insert(job_class, Box::new(handler));
    }

    /// Check if a handler is registered for a job class
    pub fn has_handler(&self, job_class: &str) -> bool {
        self.handlers.contains_key(job_class)
    }

    /// Get the list of registered job classes
    pub fn registered_classes(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    fn handler(&self, job_class: &str) -> Option<&dyn JobHandler> {
        self.handlers.get(job_class).map(|h| h.as_ref())
    }
}

/// One job execution: an invocation bound to the registry
pub struct JobRunner {
    invocation: JobInvocation,
    registry: Arc<JobRegistry>,
}

impl JobRunner {
    /// Decode a message into a runnable job
    pub fn from_message(message: &QueueMessage, registry: Arc<JobRegistry>) -> Result<Self> {
        let invocation = JobInvocation::decode(&message.body)?;
        Ok(Self {
            invocation,
            registry,
        })
    }

    /// The decoded invocation
    pub fn invocation(&self) -> &JobInvocation {
        &self.invocation
    }

    /// Job identifier, for logging
    pub fn id(&self) -> &str {
        &self.invocation.job_id
    }

    /// Job class name, for logging
    pub fn class_name(&self) -> &str {
        &self.invocation.job_class
    }

    /// Whether the caller's own retry mechanism already retried this job
    pub fn retried(&self) -> bool {
        self.invocation.retried()
    }

    /// Execute the job logic
    ///
    /// A missing handler is an ordinary execution error, routed to the
    /// error pipeline like any other job failure.
    pub async fn run(&self) -> anyhow::Result<()> {
        match self.registry.handler(&self.invocation.job_class) {
            Some(handler) => handler.perform(&self.invocation).await,
            None => Err(anyhow::anyhow!(
                "No handler registered for job class: {}",
                self.invocation.job_class
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;
    struct FailHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn perform(&self, _invocation: &JobInvocation) -> anyhow::Result<()> {
            Ok(())
        }

        fn job_class(&self) -> &str {
            "NoopJob"
        }
    }

    #[async_trait]
    impl JobHandler for FailHandler {
        async fn perform(&self, _invocation: &JobInvocation) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("boom"))
        }

        fn job_class(&self) -> &str {
            "FailJob"
        }
    }

    fn body(job_class: &str) -> String {
        format!(
            r#"{{"job_id":"11111111-2222-3333-4444-555555555555","job_class":"{}","arguments":[1,"two"],"executions":0}}"#,
            job_class
        )
    }

    #[test]
    fn test_decode() {
        let invocation = JobInvocation::decode(&body("NoopJob")).unwrap();
        assert_eq!(invocation.job_class, "NoopJob");
        assert_eq!(invocation.arguments.len(), 2);
        assert!(!invocation.retried());
    }

    #[test]
    fn test_decode_malformed() {
        let result = JobInvocation::decode("not json at all");
        assert!(matches!(result, Err(PollerError::Decode(_))));
    }

    #[test]
    fn test_decode_empty_class() {
        let result = JobInvocation::decode(r#"{"job_id":"x","job_class":""}"#);
        assert!(matches!(result, Err(PollerError::Decode(_))));
    }

    #[test]
    fn test_retried() {
        let mut invocation = JobInvocation::decode(&body("NoopJob")).unwrap();
        invocation.executions = 2;
        assert!(invocation.retried());
    }

    #[tokio::test]
    async fn test_runner_success() {
        let mut registry = JobRegistry::new();
        registry.register(NoopHandler);

        let message = QueueMessage::new("https://q.example/q", "m-1", "r-1", body("NoopJob"));
        let runner = JobRunner::from_message(&message, Arc::new(registry)).unwrap();

        assert_eq!(runner.class_name(), "NoopJob");
        assert!(runner.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_runner_failure() {
        let mut registry = JobRegistry::new();
        registry.register(FailHandler);

        let message = QueueMessage::new("https://q.example/q", "m-1", "r-1", body("FailJob"));
        let runner = JobRunner::from_message(&message, Arc::new(registry)).unwrap();

        let err = runner.run().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_runner_missing_handler() {
        let registry = Arc::new(JobRegistry::new());
        let message = QueueMessage::new("https://q.example/q", "m-1", "r-1", body("GhostJob"));
        let runner = JobRunner::from_message(&message, registry).unwrap();

        let err = runner.run().await.unwrap_err();
        assert!(err.to_string().contains("No handler registered"));
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let mut registry = JobRegistry::new();
        registry.register(FnJobHandler::new("EchoJob", |invocation| {
            Box::pin(async move {
                assert_eq!(invocation.job_class, "EchoJob");
                Ok(())
            })
        }));

        assert!(registry.has_handler("EchoJob"));
        let message = QueueMessage::new("https://q.example/q", "m-1", "r-1", body("EchoJob"));
        let runner = JobRunner::from_message(&message, Arc::new(registry)).unwrap();
        assert!(runner.run().await.is_ok());
    }
}
