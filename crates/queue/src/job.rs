//! Job records owned by the queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job identifier. Monotonically increasing within one queue.
pub type JobId = u64;

/// Current time as epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the ready queue (first run or retry).
    Pending,
    /// The processor succeeded.
    Completed,
    /// Attempts exhausted or no processor registered.
    Failed,
}

impl JobStatus {
    /// Whether the job will never run again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Delay policy between failed attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base * 2^(attempt - 1)`, capped.
    #[default]
    #[serde(alias = "exp")]
    Exponential,
    /// `base` every time.
    Fixed,
}

/// Options accepted by [`crate::JobQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Execution ceiling. Zero is treated as one.
    pub max_attempts: u32,
    /// Retry delay policy.
    pub backoff: Backoff,
    /// Delay before the first run.
    pub delay: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Exponential,
            delay: Duration::ZERO,
        }
    }
}

impl EnqueueOptions {
    /// Set the execution ceiling.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the retry delay policy.
    #[must_use]
    pub const fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay the first run.
    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A unit of deferred work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID.
    pub id: JobId,
    /// Selects the processor.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Opaque to the queue.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Executions started so far.
    pub attempts: u32,
    /// Execution ceiling.
    pub max_attempts: u32,
    /// Retry delay policy.
    pub backoff: Backoff,
    /// Epoch milliseconds before which the job must not run.
    pub next_run_at: i64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        job_type: String,
        payload: serde_json::Value,
        options: &EnqueueOptions,
    ) -> Self {
        let now = Utc::now();
        let delay_ms = i64::try_from(options.delay.as_millis()).unwrap_or(i64::MAX);
        Self {
            id,
            job_type,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: options.max_attempts.max(1),
            backoff: options.backoff,
            next_run_at: now.timestamp_millis().saturating_add(delay_ms),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether another attempt is allowed after a failure.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Record a failed attempt and push the eligibility time forward.
    /// The new time is always later than the previous one.
    pub(crate) fn schedule_retry(&mut self, error: impl Into<String>, delay: Duration) {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let candidate = now_ms().saturating_add(delay_ms);
        self.next_run_at = candidate.max(self.next_run_at.saturating_add(1));
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_job(options: &EnqueueOptions) -> Job {
        Job::new(1, "t".to_string(), json!({"k": 1}), options)
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = make_job(&EnqueueOptions::default());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 5);
        assert!(job.last_error.is_none());
    }

    #[test]
    fn test_zero_max_attempts_normalised() {
        let job = make_job(&EnqueueOptions::default().max_attempts(0));
        assert_eq!(job.max_attempts, 1);
    }

    #[test]
    fn test_delay_pushes_next_run() {
        let before = now_ms();
        let job = make_job(&EnqueueOptions::default().delay(Duration::from_secs(60)));
        assert!(job.next_run_at >= before + 60_000);
    }

    #[test]
    fn test_retry_is_strictly_later() {
        let mut job = make_job(&EnqueueOptions::default().delay(Duration::from_secs(3600)));
        let previous = job.next_run_at;

        // A short delay would land earlier than the original far-future time.
        job.schedule_retry("boom", Duration::from_millis(1));
        assert!(job.next_run_at > previous);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_backoff_accepts_exp_alias() {
        let backoff: Backoff = serde_json::from_str("\"exp\"").unwrap_or(Backoff::Fixed);
        assert_eq!(backoff, Backoff::Exponential);
    }

    #[test]
    fn test_job_serializes_type_field() {
        let job = make_job(&EnqueueOptions::default());
        let value = serde_json::to_value(&job).unwrap_or_default();
        assert_eq!(value["type"], "t");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["maxAttempts"], 5);
    }
}
