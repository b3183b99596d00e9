//! Job queue handle and worker loop.
//!
//! One [`JobQueue`] owns one store and at most one worker task. The worker
//! executes jobs strictly one at a time; while idle it waits for either an
//! enqueue wake-up or a timer (the head job's deadline, or the poll interval
//! when nothing is queued).

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use subcast_common::{AppError, JobOutcome, Metrics, QueueConfig, Timer, get_metrics};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::job::{EnqueueOptions, Job, JobId, now_ms};
use crate::persistence::JobPersistence;
use crate::processor::ProcessorRegistry;
use crate::retry::RetryConfig;
use crate::store::{Head, JobStore, StoreStats};

/// Error recorded on a job whose type has no registered processor.
pub const NO_PROCESSOR: &str = "no processor";

/// Queue error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The ready queue already holds `max_depth` jobs.
    #[error("Queue is full: {max_depth} jobs waiting")]
    QueueFull {
        /// Configured limit.
        max_depth: usize,
    },
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err.to_string())
    }
}

/// Builder for [`JobQueue`].
pub struct JobQueueBuilder {
    config: QueueConfig,
    persistence: Option<Arc<dyn JobPersistence>>,
    metrics: Option<Arc<Metrics>>,
}

impl JobQueueBuilder {
    /// Mirror job state changes to `persistence`.
    #[must_use]
    pub fn persistence(mut self, persistence: Arc<dyn JobPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Record into `metrics` instead of the global instance.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the queue. The worker is not started.
    #[must_use]
    pub fn build(self) -> JobQueue {
        let retry = RetryConfig::with_base(self.config.backoff_base())
            .max_delay(self.config.max_backoff());

        JobQueue {
            inner: Arc::new(Inner {
                store: Mutex::new(JobStore::new()),
                wake: Notify::new(),
                retry,
                poll_interval: self.config.poll_interval().max(Duration::from_millis(1)),
                max_depth: self.config.max_depth,
                default_max_attempts: self.config.default_max_attempts,
                persistence: self.persistence,
                metrics: self.metrics.unwrap_or_else(|| Arc::clone(get_metrics())),
                worker: Mutex::new(None),
            }),
        }
    }
}

/// Running worker task.
struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

struct Inner {
    store: Mutex<JobStore>,
    wake: Notify,
    retry: RetryConfig,
    poll_interval: Duration,
    max_depth: Option<usize>,
    default_max_attempts: u32,
    persistence: Option<Arc<dyn JobPersistence>>,
    metrics: Arc<Metrics>,
    worker: Mutex<Option<Worker>>,
}

/// What the worker does next.
enum Step {
    /// Run a job popped from the given store generation.
    Run(Job, u64),
    Wait(Duration),
}

/// In-process job queue. Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

impl JobQueue {
    /// Create a queue with no persistence, recording into the global metrics.
    #[must_use]
    pub fn new(config: &QueueConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start building a queue.
    #[must_use]
    pub fn builder(config: &QueueConfig) -> JobQueueBuilder {
        JobQueueBuilder {
            config: config.clone(),
            persistence: None,
            metrics: None,
        }
    }

    /// Options carrying the configured default attempt ceiling.
    #[must_use]
    pub fn default_options(&self) -> EnqueueOptions {
        EnqueueOptions::default().max_attempts(self.inner.default_max_attempts)
    }

    /// Add a job and wake the worker.
    ///
    /// # Errors
    /// Returns [`QueueError::QueueFull`] when the queue is bounded and full.
    /// Nothing is created in that case.
    pub fn enqueue(
        &self,
        job_type: impl Into<String>,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        let job_type = job_type.into();
        let id = {
            let mut store = self.inner.lock_store();
            if let Some(max_depth) = self.inner.max_depth {
                if store.ready_len() >= max_depth {
                    drop(store);
                    self.inner.metrics.record_rejected();
                    warn!(job_type = %job_type, max_depth, "Queue full, job rejected");
                    return Err(QueueError::QueueFull { max_depth });
                }
            }
            let id = store.next_id();
            store.insert(Job::new(id, job_type.clone(), payload, &options));
            id
        };

        self.inner.wake.notify_one();
        self.inner.metrics.record_enqueued();
        debug!(job_id = id, job_type = %job_type, "Job enqueued");
        Ok(id)
    }

    /// Free slots in a bounded queue. `None` when unbounded.
    #[must_use]
    pub fn remaining_capacity(&self) -> Option<usize> {
        let max_depth = self.inner.max_depth?;
        Some(max_depth.saturating_sub(self.inner.lock_store().ready_len()))
    }

    /// Jobs still waiting to run, in execution order.
    #[must_use]
    pub fn pending_jobs(&self) -> Vec<Job> {
        self.inner.lock_store().pending()
    }

    /// Any job in the store, terminal ones included.
    #[must_use]
    pub fn job(&self, id: JobId) -> Option<Job> {
        self.inner.lock_store().get(id).cloned()
    }

    /// Job counts by status.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.inner.lock_store().stats()
    }

    /// Drop every job and restart ids at 1.
    ///
    /// A job executing right now finishes, but its outcome is discarded.
    pub fn clear_queue(&self) {
        self.inner.lock_store().clear();
        debug!("Job queue cleared");
    }

    /// Start the worker with `processors`.
    ///
    /// Does nothing when a worker is already running. Otherwise the given
    /// registry replaces whatever a previous worker used.
    pub fn start(&self, processors: ProcessorRegistry) {
        let mut slot = self.inner.lock_worker();
        if slot.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Job worker already running");
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        info!(job_types = ?processors.job_types(), "Starting job worker");
        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.inner),
            processors,
            Arc::clone(&stop),
        ));
        *slot = Some(Worker { handle, stop });
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// A job already executing runs to completion first. Once this returns no
    /// job is dispatched until [`JobQueue::start`] is called again.
    pub async fn stop(&self) {
        let worker = self.inner.lock_worker().take();
        let Some(worker) = worker else {
            return;
        };

        worker.stop.store(true, Ordering::Release);
        self.inner.wake.notify_one();

        if let Err(e) = worker.handle.await {
            error!(error = %e, "Job worker task failed");
        }
        info!("Job worker stopped");
    }

    /// Whether a worker is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .lock_worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

impl Inner {
    fn lock_store(&self) -> MutexGuard<'_, JobStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the head job if due, otherwise say how long to wait.
    fn next_step(&self) -> Step {
        let mut store = self.lock_store();
        let now = now_ms();
        match store.head(now) {
            Head::Due(_) => match store.pop_due(now) {
                Some(job) => Step::Run(job, store.generation()),
                None => Step::Wait(Duration::ZERO),
            },
            Head::NotDue(at) => {
                let wait = u64::try_from(at.saturating_sub(now)).unwrap_or(0);
                Step::Wait(Duration::from_millis(wait))
            }
            Head::Empty => Step::Wait(self.poll_interval),
        }
    }

    /// Apply `f` to the stored job and return a copy of the result.
    ///
    /// Does nothing once the store was cleared after `generation`; the id may
    /// belong to a different job by then.
    fn update(&self, generation: u64, id: JobId, f: impl FnOnce(&mut Job)) -> Option<Job> {
        let mut store = self.lock_store();
        if store.generation() != generation {
            return None;
        }
        let job = store.get_mut(id)?;
        f(job);
        Some(job.clone())
    }

    /// Queue a retried job again unless the store was cleared meanwhile.
    fn requeue(&self, generation: u64, id: JobId) {
        let mut store = self.lock_store();
        if store.generation() == generation {
            store.requeue(id);
        }
    }

    async fn process_job(&self, job: Job, generation: u64, processors: &ProcessorRegistry) {
        let id = job.id;

        let Some(processor) = processors.get(&job.job_type) else {
            warn!(job_id = id, job_type = %job.job_type, "No processor registered for job type");
            if let Some(failed) = self.update(generation, id, |j| j.mark_failed(NO_PROCESSOR)) {
                self.metrics.record_job_outcome(JobOutcome::Failed);
                self.persist(&failed).await;
            }
            return;
        };

        let Some(running) = self.update(generation, id, |j| j.attempts += 1) else {
            debug!(job_id = id, "Job vanished before execution");
            return;
        };

        debug!(
            job_id = id,
            job_type = %running.job_type,
            attempts = running.attempts,
            "Processing job"
        );

        let timer = Timer::start();
        let result = AssertUnwindSafe(processor.process(&running.payload, &running))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err("processor panicked".into()));
        self.metrics.record_job_run(timer.elapsed());

        let outcome = match result {
            Ok(()) => self
                .update(generation, id, Job::mark_completed)
                .map(|job| (job, JobOutcome::Completed)),
            Err(e) => {
                let message = e.to_string();
                let retry = &self.retry;
                let mut outcome = JobOutcome::Failed;
                self.update(generation, id, |job| {
                    if job.can_retry() {
                        let delay = retry.delay_for_attempt(job.attempts, job.backoff);
                        job.schedule_retry(message, delay);
                        outcome = JobOutcome::Retried;
                    } else {
                        job.mark_failed(message);
                    }
                })
                .map(|job| (job, outcome))
            }
        };

        let Some((job, outcome)) = outcome else {
            debug!(job_id = id, "Job vanished during execution");
            return;
        };

        match outcome {
            JobOutcome::Completed => {
                info!(job_id = id, job_type = %job.job_type, attempts = job.attempts, "Job completed");
            }
            JobOutcome::Retried => {
                self.requeue(generation, id);
                self.wake.notify_one();
                warn!(
                    job_id = id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    next_run_at = job.next_run_at,
                    error = job.last_error.as_deref().unwrap_or_default(),
                    "Job failed, retry scheduled"
                );
            }
            JobOutcome::Failed => {
                error!(
                    job_id = id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    error = job.last_error.as_deref().unwrap_or_default(),
                    "Job failed permanently"
                );
            }
        }

        self.metrics.record_job_outcome(outcome);
        self.persist(&job).await;
    }

    /// Mirror a job. Failures are logged and otherwise ignored.
    async fn persist(&self, job: &Job) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(e) = persistence.upsert(job).await {
            self.metrics.record_persistence_failure();
            warn!(job_id = job.id, error = %e, "Failed to persist job");
        }
    }
}

async fn run_worker(inner: Arc<Inner>, processors: ProcessorRegistry, stop: Arc<AtomicBool>) {
    debug!("Job worker loop started");

    while !stop.load(Ordering::Acquire) {
        match inner.next_step() {
            Step::Run(job, generation) => inner.process_job(job, generation, &processors).await,
            Step::Wait(wait) if wait.is_zero() => tokio::task::yield_now().await,
            Step::Wait(wait) => {
                tokio::select! {
                    () = inner.wake.notified() => {}
                    () = tokio::time::sleep(wait) => {}
                }
            }
        }
    }

    debug!("Job worker loop exited");
}
