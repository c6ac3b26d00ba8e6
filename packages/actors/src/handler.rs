//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use queue_core::Job;

/// Result type for job handlers.
pub type HandlerResult = Result<(), String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Future type for lifecycle hooks.
pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific type are processed.
/// Returned futures must own what they need: clone out of the `&Job` before
/// moving into the `async` block.
pub trait JobHandler: Send + Sync + 'static {
    /// Process a job. An `Err` is retried with backoff until the job runs out
    /// of attempts.
    fn process(&self, job: &Job) -> HandlerFuture;

    /// Process several jobs of this type in one invocation.
    ///
    /// Only called by a fast tier configured with `handler_batch_size`. The
    /// single result applies to every job in the batch. The default runs
    /// `process` on each job in order and stops at the first error.
    fn process_batch(&self, jobs: &[Job]) -> HandlerFuture {
        let pending: Vec<HandlerFuture> = jobs.iter().map(|job| self.process(job)).collect();
        Box::pin(async move {
            for fut in pending {
                fut.await?;
            }
            Ok(())
        })
    }

    /// Runs after the store has recorded `completed`.
    fn on_success(&self, _job: &Job) -> HookFuture {
        Box::pin(async {})
    }

    /// Runs after the store has recorded `failed` or a reschedule.
    fn on_failure(&self, _job: &Job, _error: &str) -> HookFuture {
        Box::pin(async {})
    }

    /// Override the queue's jitter setting for this handler's retries.
    fn retry_jitter(&self) -> Option<bool> {
        None
    }
}

/// Registry for job handlers.
///
/// Maps job types to their handlers for dynamic dispatch. Shared between the
/// manager and every worker, so registration works before and after `start`.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type. Last registration wins.
    pub fn register<H: JobHandler>(&self, job_type: impl Into<String>, handler: H) {
        self.register_arc(job_type, Arc::new(handler));
    }

    /// Register an already shared handler.
    pub fn register_arc(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let job_type = job_type.into();
        let previous = self.handlers.write().insert(job_type.clone(), handler);
        if previous.is_some() {
            tracing::warn!(job_type = %job_type, "Replacing existing handler");
        } else {
            tracing::debug!(job_type = %job_type, "Registered handler");
        }
    }

    /// Get a handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().get(job_type).cloned()
    }

    /// Check if a handler exists for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.read().contains_key(job_type)
    }

    /// List all registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for JobHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn process(&self, job: &Job) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Helper macro for creating job handlers from async closures.
///
/// ```ignore
/// registry.register("echo", job_handler!(|job| {
///     tracing::info!(payload = %job.payload, "echo");
///     Ok(())
/// }));
/// ```
#[macro_export]
macro_rules! job_handler {
    (|$job:ident| $body:expr) => {
        $crate::FnHandler::new(|$job: &$crate::Job| -> $crate::HandlerFuture {
            let $job = $job.clone();
            Box::pin(async move { $body })
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fails;

    impl JobHandler for Fails {
        fn process(&self, job: &Job) -> HandlerFuture {
            let job_type = job.job_type.clone();
            Box::pin(async move { Err(format!("{job_type} failed")) })
        }
    }

    fn job(job_type: &str) -> Job {
        Job::new(job_type, serde_json::Value::Null)
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = JobHandlerRegistry::new();
        registry.register("email", Fails);
        registry.register("email", crate::job_handler!(|_job| Ok(())));

        let handler = registry.get("email").expect("registered");
        assert_eq!(handler.process(&job("email")).await, Ok(()));
        assert_eq!(registry.job_types(), vec!["email".to_string()]);
    }

    #[tokio::test]
    async fn default_batch_stops_at_first_error() {
        let handler = Fails;
        let result = handler.process_batch(&[job("a"), job("b")]).await;
        assert_eq!(result, Err("a failed".to_string()));
    }

    #[test]
    fn unknown_types_have_no_handler() {
        let registry = JobHandlerRegistry::new();
        assert!(!registry.has_handler("missing"));
        assert!(registry.get("missing").is_none());
    }
}
