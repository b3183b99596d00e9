//! Broadcast planner.
//!
//! Turns one broadcast request into chunk jobs on the queue. Rejections
//! (disabled flag, bad chunk size, not enough queue capacity) happen before
//! anything is enqueued.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use subcast_common::{AppError, AppResult, BroadcastConfig, Metrics, get_metrics};
use tracing::{debug, info};
use validator::Validate;

use crate::dispatcher::RecipientId;
use crate::flags::{BROADCASTS_ENABLED, FeatureFlags};
use crate::job::{Backoff, EnqueueOptions};
use crate::jobs::{SEND_BATCH_JOB, SendBatchJob};
use crate::queue::JobQueue;

/// Attempts granted to each chunk job.
const CHUNK_MAX_ATTEMPTS: u32 = 5;

/// Input of [`BroadcastPlanner::plan`].
#[derive(Debug, Clone, Validate)]
pub struct PlanOptions {
    /// Target audience: an id list or an object with a `userIds` list.
    pub segment: Value,
    /// Message text.
    pub text: String,
    /// Optional media reference.
    pub media: Option<String>,
    /// Recipients per chunk job.
    #[validate(range(min = 1))]
    pub chunk_size: usize,
    /// Pause between successive chunk enqueues.
    pub pause: Duration,
}

impl PlanOptions {
    /// Options with chunk size 25 and no pause.
    #[must_use]
    pub fn new(segment: Value, text: impl Into<String>) -> Self {
        Self::with_defaults(segment, text, &BroadcastConfig::default())
    }

    /// Options taking chunk size and pause from configuration.
    #[must_use]
    pub fn with_defaults(segment: Value, text: impl Into<String>, config: &BroadcastConfig) -> Self {
        Self {
            segment,
            text: text.into(),
            media: None,
            chunk_size: config.chunk_size,
            pause: config.pause(),
        }
    }

    /// Attach a media reference.
    #[must_use]
    pub fn media(mut self, media: impl Into<String>) -> Self {
        self.media = Some(media.into());
        self
    }

    /// Set the chunk size.
    #[must_use]
    pub const fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the pause between chunk enqueues.
    #[must_use]
    pub const fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }
}

/// Result of a successful plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PlanSummary {
    /// Recipients in the resolved audience.
    pub total: usize,
    /// Chunk jobs enqueued.
    pub chunks: usize,
}

/// Resolve a segment into recipient ids.
///
/// Accepts a bare array or an object with `userIds` (or `user_ids`). Any other
/// shape is an empty audience. Entries that are not integers are skipped.
#[must_use]
pub fn resolve_audience(segment: &Value) -> Vec<RecipientId> {
    let ids = match segment {
        Value::Array(ids) => ids,
        Value::Object(map) => match map.get("userIds").or_else(|| map.get("user_ids")) {
            Some(Value::Array(ids)) => ids,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    ids.iter().filter_map(Value::as_i64).collect()
}

/// Splits broadcasts into chunk jobs.
#[derive(Clone)]
pub struct BroadcastPlanner {
    queue: JobQueue,
    flags: Arc<dyn FeatureFlags>,
    metrics: Arc<Metrics>,
}

impl BroadcastPlanner {
    /// Create a planner enqueueing onto `queue`.
    #[must_use]
    pub fn new(queue: JobQueue, flags: Arc<dyn FeatureFlags>) -> Self {
        Self {
            queue,
            flags,
            metrics: Arc::clone(get_metrics()),
        }
    }

    /// Record into a different metrics instance.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Plan a broadcast.
    ///
    /// # Errors
    /// - [`AppError::BroadcastsDisabled`] when the `broadcasts_enabled` flag is off
    /// - [`AppError::Validation`] when `chunk_size` is zero
    /// - [`AppError::Queue`] when a bounded queue cannot take every chunk
    ///
    /// Nothing is enqueued in any of these cases.
    pub async fn plan(&self, options: PlanOptions) -> AppResult<PlanSummary> {
        let result = self.try_plan(options).await;
        self.metrics.record_broadcast(result.is_ok());
        result
    }

    async fn try_plan(&self, options: PlanOptions) -> AppResult<PlanSummary> {
        if !self.flags.get_flag(BROADCASTS_ENABLED, false).await {
            return Err(AppError::BroadcastsDisabled);
        }
        options.validate()?;

        let audience = resolve_audience(&options.segment);
        let total = audience.len();
        let chunks = total.div_ceil(options.chunk_size);
        if chunks == 0 {
            debug!("Broadcast audience is empty");
            return Ok(PlanSummary::default());
        }

        if let Some(remaining) = self.queue.remaining_capacity() {
            if remaining < chunks {
                return Err(AppError::Queue(format!(
                    "not enough capacity for {chunks} chunks ({remaining} free)"
                )));
            }
        }

        let job_options = EnqueueOptions::default()
            .max_attempts(CHUNK_MAX_ATTEMPTS)
            .backoff(Backoff::Exponential);

        for (index, chunk) in audience.chunks(options.chunk_size).enumerate() {
            if index > 0 && !options.pause.is_zero() {
                tokio::time::sleep(options.pause).await;
            }

            let payload = SendBatchJob::new(chunk.to_vec(), options.text.clone(), options.media.clone());
            let payload = serde_json::to_value(&payload)
                .map_err(|e| AppError::Internal(format!("Failed to encode chunk: {e}")))?;
            self.queue
                .enqueue(SEND_BATCH_JOB, payload, job_options.clone())?;
        }

        info!(total, chunks, chunk_size = options.chunk_size, "Broadcast planned");
        Ok(PlanSummary { total, chunks })
    }
}
