//! Job store and ready queue.
//!
//! The store owns every job ever enqueued. The ready queue is a min-heap of
//! `(next_run_at, sequence)` keys pointing into the store; the sequence
//! number grows with every insertion, so equal deadlines keep insertion
//! order. Terminal jobs stay in the store.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use crate::job::{Job, JobId, JobStatus};

/// Position of a job in the ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    run_at: i64,
    seq: u64,
    id: JobId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.run_at
            .cmp(&other.run_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What the head of the ready queue says the worker should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// Nothing is queued.
    Empty,
    /// The earliest job becomes eligible at this epoch-ms time.
    NotDue(i64),
    /// The earliest job is eligible.
    Due(JobId),
}

/// Counts of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Jobs waiting for a first run or a retry.
    pub pending: usize,
    /// Jobs whose processor succeeded.
    pub completed: usize,
    /// Jobs that failed for good.
    pub failed: usize,
}

/// Job store plus ready queue.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<JobId, Job>,
    ready: BinaryHeap<Reverse<ReadyEntry>>,
    last_id: JobId,
    seq: u64,
    generation: u64,
}

impl JobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next job id.
    pub fn next_id(&mut self) -> JobId {
        self.last_id += 1;
        self.last_id
    }

    /// Store a new job and queue it.
    pub fn insert(&mut self, job: Job) {
        let id = job.id;
        let run_at = job.next_run_at;
        self.jobs.insert(id, job);
        self.push_ready(id, run_at);
    }

    /// Queue an existing job again at its current `next_run_at`.
    pub fn requeue(&mut self, id: JobId) -> bool {
        match self.jobs.get(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                let run_at = job.next_run_at;
                self.push_ready(id, run_at);
                true
            }
            _ => false,
        }
    }

    fn push_ready(&mut self, id: JobId, run_at: i64) {
        self.seq += 1;
        self.ready.push(Reverse(ReadyEntry {
            run_at,
            seq: self.seq,
            id,
        }));
    }

    /// Inspect the head of the ready queue at time `now`.
    ///
    /// Entries whose job is gone from the store are discarded on the way.
    pub fn head(&mut self, now: i64) -> Head {
        while let Some(Reverse(entry)) = self.ready.peek().copied() {
            if !self.jobs.contains_key(&entry.id) {
                tracing::debug!(job_id = entry.id, "Dropping stale ready queue entry");
                self.ready.pop();
                continue;
            }
            if entry.run_at > now {
                return Head::NotDue(entry.run_at);
            }
            return Head::Due(entry.id);
        }
        Head::Empty
    }

    /// Remove the head entry if it is due at `now` and return a copy of its job.
    pub fn pop_due(&mut self, now: i64) -> Option<Job> {
        match self.head(now) {
            Head::Due(id) => {
                self.ready.pop();
                self.jobs.get(&id).cloned()
            }
            Head::Empty | Head::NotDue(_) => None,
        }
    }

    /// Get a job by id.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    /// Get a mutable job by id.
    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Jobs still in the ready queue, in execution order.
    #[must_use]
    pub fn pending(&self) -> Vec<Job> {
        let mut entries: Vec<ReadyEntry> = self.ready.iter().map(|Reverse(e)| *e).collect();
        entries.sort();
        entries
            .into_iter()
            .filter_map(|entry| self.jobs.get(&entry.id).cloned())
            .collect()
    }

    /// Number of entries in the ready queue.
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Count jobs by status.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.jobs
            .values()
            .fold(StoreStats::default(), |mut stats, job| {
                match job.status {
                    JobStatus::Pending => stats.pending += 1,
                    JobStatus::Completed => stats.completed += 1,
                    JobStatus::Failed => stats.failed += 1,
                }
                stats
            })
    }

    /// Bumped by every [`JobStore::clear`]. Ids are only unique within one
    /// generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Reset ids, jobs and queue, starting a new generation.
    pub fn clear(&mut self) {
        *self = Self {
            generation: self.generation + 1,
            ..Self::default()
        };
    }

    /// Forget a job while leaving its queue entry behind.
    #[cfg(test)]
    fn remove(&mut self, id: JobId) -> Option<Job> {
        self.jobs.remove(&id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::job::EnqueueOptions;
    use serde_json::json;

    fn add(store: &mut JobStore, run_at: i64) -> JobId {
        let id = store.next_id();
        let mut job = Job::new(id, "t".to_string(), json!(null), &EnqueueOptions::default());
        job.next_run_at = run_at;
        store.insert(job);
        id
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut store = JobStore::new();
        let a = add(&mut store, 0);
        let b = add(&mut store, 0);
        let c = add(&mut store, 0);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_orders_by_run_at() {
        let mut store = JobStore::new();
        let late = add(&mut store, 300);
        let early = add(&mut store, 100);
        let middle = add(&mut store, 200);

        let order: Vec<JobId> = store.pending().iter().map(|j| j.id).collect();
        assert_eq!(order, vec![early, middle, late]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut store = JobStore::new();
        let ids: Vec<JobId> = (0..10).map(|_| add(&mut store, 500)).collect();

        let mut popped = Vec::new();
        while let Some(job) = store.pop_due(1000) {
            popped.push(job.id);
        }
        assert_eq!(popped, ids);
    }

    #[test]
    fn test_head_not_due() {
        let mut store = JobStore::new();
        add(&mut store, 2000);

        assert_eq!(store.head(1000), Head::NotDue(2000));
        assert!(store.pop_due(1000).is_none());
        assert_eq!(store.ready_len(), 1);
    }

    #[test]
    fn test_empty_head() {
        let mut store = JobStore::new();
        assert_eq!(store.head(0), Head::Empty);
        assert!(store.pop_due(0).is_none());
    }

    #[test]
    fn test_stale_entries_are_discarded() {
        let mut store = JobStore::new();
        let gone = add(&mut store, 100);
        let kept = add(&mut store, 200);
        store.remove(gone);

        assert_eq!(store.head(1000), Head::Due(kept));
        assert_eq!(store.ready_len(), 1);
    }

    #[test]
    fn test_requeue_only_pending() {
        let mut store = JobStore::new();
        let id = add(&mut store, 100);
        let job = store.pop_due(100).unwrap();
        assert_eq!(job.id, id);

        assert!(store.requeue(id));
        assert_eq!(store.ready_len(), 1);
        store.pop_due(100).unwrap();

        store.get_mut(id).unwrap().mark_completed();
        assert!(!store.requeue(id));
        assert_eq!(store.ready_len(), 0);
    }

    #[test]
    fn test_stats_and_clear() {
        let mut store = JobStore::new();
        let a = add(&mut store, 0);
        let b = add(&mut store, 0);
        add(&mut store, 0);
        store.get_mut(a).unwrap().mark_completed();
        store.get_mut(b).unwrap().mark_failed("boom");

        assert_eq!(
            store.stats(),
            StoreStats {
                pending: 1,
                completed: 1,
                failed: 1
            }
        );

        let generation = store.generation();
        store.clear();
        assert_eq!(store.stats(), StoreStats::default());
        assert_eq!(store.ready_len(), 0);
        assert_eq!(store.next_id(), 1);
        assert_eq!(store.generation(), generation + 1);
    }
}
