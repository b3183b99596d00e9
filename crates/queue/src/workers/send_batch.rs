//! Broadcast chunk processor.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use subcast_common::{Metrics, get_metrics};
use tracing::info;

use crate::dispatcher::{SendOne, dispatch_recorded};
use crate::job::Job;
use crate::jobs::SendBatchJob;
use crate::processor::{Processor, ProcessorError};

/// Processor for [`crate::jobs::SEND_BATCH_JOB`].
///
/// Per-recipient failures are counted, not raised, so a chunk job completes
/// once every recipient was attempted. Only an undecodable payload fails the
/// job.
#[derive(Clone)]
pub struct SendBatchProcessor {
    sender: Arc<dyn SendOne>,
    rate_per_second: f64,
    metrics: Arc<Metrics>,
}

impl SendBatchProcessor {
    /// Create a processor sending through `sender` at `rate_per_second`.
    #[must_use]
    pub fn new(sender: Arc<dyn SendOne>, rate_per_second: f64) -> Self {
        Self {
            sender,
            rate_per_second,
            metrics: Arc::clone(get_metrics()),
        }
    }

    /// Record recipient outcomes into `metrics` instead of the global instance.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

#[async_trait]
impl Processor for SendBatchProcessor {
    async fn process(&self, payload: &Value, job: &Job) -> Result<(), ProcessorError> {
        let batch: SendBatchJob = serde_json::from_value(payload.clone())
            .map_err(|e| format!("Invalid sendBatch payload: {e}"))?;

        info!(
            job_id = job.id,
            recipients = batch.user_ids.len(),
            attempts = job.attempts,
            "Dispatching broadcast chunk"
        );

        let result = dispatch_recorded(
            &batch.user_ids,
            &batch.message(),
            self.rate_per_second,
            self.sender.as_ref(),
            &self.metrics,
        )
        .await;

        info!(
            job_id = job.id,
            success = result.success,
            failed = result.failed,
            "Broadcast chunk dispatched"
        );
        Ok(())
    }
}
