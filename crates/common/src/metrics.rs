//! Metrics collection for subcast.
//!
//! Counters for the job queue and the broadcast pipeline. Everything is a
//! relaxed atomic; readers take a [`MetricsSnapshot`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Application metrics collector.
#[derive(Debug)]
pub struct Metrics {
    // === Job Queue Metrics ===
    /// Jobs enqueued
    pub jobs_enqueued: AtomicU64,
    /// Jobs rejected because the queue was full
    pub jobs_rejected: AtomicU64,
    /// Jobs completed
    pub jobs_completed: AtomicU64,
    /// Jobs scheduled for another attempt
    pub jobs_retried: AtomicU64,
    /// Jobs that reached a terminal failure
    pub jobs_failed: AtomicU64,
    /// Total processor time in microseconds
    pub job_time_us_total: AtomicU64,
    /// Processor invocations for average calculation
    pub job_time_count: AtomicU64,

    // === Broadcast Metrics ===
    /// Broadcasts planned
    pub broadcasts_planned: AtomicU64,
    /// Broadcasts rejected at planning time
    pub broadcasts_rejected: AtomicU64,
    /// Recipients that received a message
    pub recipients_delivered: AtomicU64,
    /// Recipients whose send failed for good
    pub recipients_failed: AtomicU64,
    /// Send attempts repeated after 429/5xx
    pub send_retries: AtomicU64,

    // === Persistence Metrics ===
    /// Failed mirror writes
    pub persistence_failures: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            jobs_enqueued: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            job_time_us_total: AtomicU64::new(0),
            job_time_count: AtomicU64::new(0),

            broadcasts_planned: AtomicU64::new(0),
            broadcasts_rejected: AtomicU64::new(0),
            recipients_delivered: AtomicU64::new(0),
            recipients_failed: AtomicU64::new(0),
            send_retries: AtomicU64::new(0),

            persistence_failures: AtomicU64::new(0),
        }
    }

    /// Record a job accepted by the queue.
    pub fn record_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job refused by a full queue.
    pub fn record_rejected(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one processor invocation and how long it took.
    pub fn record_job_run(&self, duration: Duration) {
        self.job_time_us_total
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.job_time_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a job execution.
    pub fn record_job_outcome(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed => &self.jobs_completed,
            JobOutcome::Retried => &self.jobs_retried,
            JobOutcome::Failed => &self.jobs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a broadcast plan.
    pub fn record_broadcast(&self, accepted: bool) {
        if accepted {
            self.broadcasts_planned.fetch_add(1, Ordering::Relaxed);
        } else {
            self.broadcasts_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a per-recipient send outcome.
    pub fn record_recipient(&self, delivered: bool) {
        if delivered {
            self.recipients_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.recipients_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a repeated send attempt.
    pub fn record_send_retry(&self) {
        self.send_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed mirror write.
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_rejected: self.jobs_rejected.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            job_avg_time_us: self.average_job_time_us(),

            broadcasts_planned: self.broadcasts_planned.load(Ordering::Relaxed),
            broadcasts_rejected: self.broadcasts_rejected.load(Ordering::Relaxed),
            recipients_delivered: self.recipients_delivered.load(Ordering::Relaxed),
            recipients_failed: self.recipients_failed.load(Ordering::Relaxed),
            send_retries: self.send_retries.load(Ordering::Relaxed),

            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }

    /// Calculate average processor time.
    fn average_job_time_us(&self) -> u64 {
        let total = self.job_time_us_total.load(Ordering::Relaxed);
        let count = self.job_time_count.load(Ordering::Relaxed);
        if count > 0 {
            total / count
        } else {
            0
        }
    }

    /// Export metrics in Prometheus format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        // Job queue metrics
        output.push_str("# HELP subcast_jobs_enqueued Jobs enqueued\n");
        output.push_str("# TYPE subcast_jobs_enqueued counter\n");
        output.push_str(&format!("subcast_jobs_enqueued {}\n", snapshot.jobs_enqueued));

        output.push_str("# HELP subcast_jobs_rejected Jobs rejected by a full queue\n");
        output.push_str("# TYPE subcast_jobs_rejected counter\n");
        output.push_str(&format!("subcast_jobs_rejected {}\n", snapshot.jobs_rejected));

        output.push_str("# HELP subcast_jobs_by_outcome Job executions by outcome\n");
        output.push_str("# TYPE subcast_jobs_by_outcome counter\n");
        output.push_str(&format!(
            "subcast_jobs_by_outcome{{outcome=\"completed\"}} {}\n",
            snapshot.jobs_completed
        ));
        output.push_str(&format!(
            "subcast_jobs_by_outcome{{outcome=\"retried\"}} {}\n",
            snapshot.jobs_retried
        ));
        output.push_str(&format!(
            "subcast_jobs_by_outcome{{outcome=\"failed\"}} {}\n",
            snapshot.jobs_failed
        ));

        output.push_str("# HELP subcast_job_time_avg_us Average processor time\n");
        output.push_str("# TYPE subcast_job_time_avg_us gauge\n");
        output.push_str(&format!(
            "subcast_job_time_avg_us {}\n",
            snapshot.job_avg_time_us
        ));

        // Broadcast metrics
        output.push_str("# HELP subcast_broadcasts_planned Broadcasts planned\n");
        output.push_str("# TYPE subcast_broadcasts_planned counter\n");
        output.push_str(&format!(
            "subcast_broadcasts_planned {}\n",
            snapshot.broadcasts_planned
        ));

        output.push_str("# HELP subcast_broadcasts_rejected Broadcasts rejected\n");
        output.push_str("# TYPE subcast_broadcasts_rejected counter\n");
        output.push_str(&format!(
            "subcast_broadcasts_rejected {}\n",
            snapshot.broadcasts_rejected
        ));

        output.push_str("# HELP subcast_recipients Recipient sends by result\n");
        output.push_str("# TYPE subcast_recipients counter\n");
        output.push_str(&format!(
            "subcast_recipients{{result=\"delivered\"}} {}\n",
            snapshot.recipients_delivered
        ));
        output.push_str(&format!(
            "subcast_recipients{{result=\"failed\"}} {}\n",
            snapshot.recipients_failed
        ));

        output.push_str("# HELP subcast_send_retries Send attempts repeated after 429/5xx\n");
        output.push_str("# TYPE subcast_send_retries counter\n");
        output.push_str(&format!("subcast_send_retries {}\n", snapshot.send_retries));

        // Persistence metrics
        output.push_str("# HELP subcast_persistence_failures Failed mirror writes\n");
        output.push_str("# TYPE subcast_persistence_failures counter\n");
        output.push_str(&format!(
            "subcast_persistence_failures {}\n",
            snapshot.persistence_failures
        ));

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a single job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The processor succeeded.
    Completed,
    /// The processor failed and the job was scheduled again.
    Retried,
    /// The job failed for good.
    Failed,
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    // Jobs
    pub jobs_enqueued: u64,
    pub jobs_rejected: u64,
    pub jobs_completed: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub job_avg_time_us: u64,

    // Broadcasts
    pub broadcasts_planned: u64,
    pub broadcasts_rejected: u64,
    pub recipients_delivered: u64,
    pub recipients_failed: u64,
    pub send_retries: u64,

    // Persistence
    pub persistence_failures: u64,
}

/// Timer guard for measuring operation duration.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.jobs_enqueued.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.recipients_delivered.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_job_outcomes() {
        let metrics = Metrics::new();

        metrics.record_job_outcome(JobOutcome::Retried);
        metrics.record_job_outcome(JobOutcome::Retried);
        metrics.record_job_outcome(JobOutcome::Completed);
        metrics.record_job_outcome(JobOutcome::Failed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_retried, 2);
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(snapshot.jobs_failed, 1);
    }

    #[test]
    fn test_record_recipients() {
        let metrics = Metrics::new();

        metrics.record_recipient(true);
        metrics.record_recipient(true);
        metrics.record_recipient(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.recipients_delivered, 2);
        assert_eq!(snapshot.recipients_failed, 1);
    }

    #[test]
    fn test_average_job_time_empty() {
        let metrics = Metrics::new();
        assert_eq!(metrics.average_job_time_us(), 0);
    }

    #[test]
    fn test_average_job_time() {
        let metrics = Metrics::new();
        metrics.record_job_run(Duration::from_micros(100));
        metrics.record_job_run(Duration::from_micros(300));
        assert_eq!(metrics.average_job_time_us(), 200);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.record_enqueued();
        metrics.record_job_outcome(JobOutcome::Completed);

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("subcast_jobs_enqueued 1"));
        assert!(prometheus.contains("subcast_jobs_by_outcome{outcome=\"completed\"} 1"));
        assert!(prometheus.contains("subcast_recipients{result=\"failed\"} 0"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
    }
}
