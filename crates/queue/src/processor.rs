//! Job processors and their registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::job::Job;

/// Error returned by a processor. Its message becomes the job's `last_error`.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// Handler for one job type.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Execute a job. Any error schedules a retry until attempts run out.
    async fn process(&self, payload: &Value, job: &Job) -> Result<(), ProcessorError>;
}

/// Adapter turning an async closure into a [`Processor`].
struct FnProcessor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Value, Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProcessorError>> + Send + 'static,
{
    async fn process(&self, payload: &Value, job: &Job) -> Result<(), ProcessorError> {
        (self.f)(payload.clone(), job.clone()).await
    }
}

/// Mapping from job type to processor. One processor per type.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor, replacing any previous one for the same type.
    #[must_use]
    pub fn register(mut self, job_type: impl Into<String>, processor: Arc<dyn Processor>) -> Self {
        self.processors.insert(job_type.into(), processor);
        self
    }

    /// Register an async closure.
    #[must_use]
    pub fn register_fn<F, Fut>(self, job_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProcessorError>> + Send + 'static,
    {
        self.register(job_type, Arc::new(FnProcessor { f }))
    }

    /// Look up the processor for a job type.
    #[must_use]
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(job_type).cloned()
    }

    /// Registered job types.
    #[must_use]
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Number of registered processors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::job::EnqueueOptions;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_fn_runs_closure() {
        let registry = ProcessorRegistry::new().register_fn("echo", |payload, _job| async move {
            if payload["ok"] == true {
                Ok(())
            } else {
                Err(ProcessorError::from("not ok"))
            }
        });

        let job = Job::new(1, "echo".into(), json!({}), &EnqueueOptions::default());
        let processor = registry.get("echo").unwrap();

        assert!(processor.process(&json!({"ok": true}), &job).await.is_ok());
        let err = processor.process(&json!({"ok": false}), &job).await.unwrap_err();
        assert_eq!(err.to_string(), "not ok");
    }

    #[test]
    fn test_register_replaces_same_type() {
        let registry = ProcessorRegistry::new()
            .register_fn("a", |_, _| async { Ok::<(), ProcessorError>(()) })
            .register_fn("b", |_, _| async { Ok::<(), ProcessorError>(()) })
            .register_fn("a", |_, _| async { Err::<(), _>(ProcessorError::from("second")) });

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.job_types(), vec!["a", "b"]);
        assert!(registry.get("missing").is_none());
    }
}
