//! Best-effort job mirror.
//!
//! The queue writes every state change of a job through a [`JobPersistence`]
//! implementation. Writes are for observability and crash forensics only:
//! a failed write is logged and otherwise ignored, and nothing is ever read
//! back into the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use fred::types::Expiration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::job::{Job, JobId};

/// Persistence error type.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// JSON serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Upsert-capable store keyed by job id.
#[async_trait]
pub trait JobPersistence: Send + Sync {
    /// Insert or replace the record for `job.id`.
    async fn upsert(&self, job: &Job) -> Result<(), PersistenceError>;
}

/// In-process mirror, useful for tests and single-node inspection.
#[derive(Clone, Default)]
pub struct MemoryJobMirror {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl MemoryJobMirror {
    /// Create an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest mirrored copy of a job.
    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Number of mirrored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether nothing has been mirrored.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobPersistence for MemoryJobMirror {
    async fn upsert(&self, job: &Job) -> Result<(), PersistenceError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }
}

/// Redis mirror storing each job as a JSON string under `{prefix}:job:{id}`.
#[derive(Clone)]
pub struct RedisJobMirror {
    redis: Arc<RedisClient>,
    prefix: String,
    ttl_secs: Option<i64>,
}

impl RedisJobMirror {
    /// Create a mirror whose records never expire.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            ttl_secs: None,
        }
    }

    /// Expire mirrored records after `ttl`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        self
    }

    fn job_key(&self, id: JobId) -> String {
        job_key(&self.prefix, id)
    }

    /// Read a mirrored record back, for inspection tooling.
    pub async fn get(&self, id: JobId) -> Result<Option<Job>, PersistenceError> {
        let raw: Option<String> = self
            .redis
            .get(self.job_key(id))
            .await
            .map_err(|e| PersistenceError::Redis(e.to_string()))?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| PersistenceError::Serialization(e.to_string()))
        })
        .transpose()
    }
}

/// Generate the mirror key for a job.
fn job_key(prefix: &str, id: JobId) -> String {
    format!("{prefix}:job:{id}")
}

#[async_trait]
impl JobPersistence for RedisJobMirror {
    async fn upsert(&self, job: &Job) -> Result<(), PersistenceError> {
        let key = self.job_key(job.id);
        let json = serde_json::to_string(job)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

        self.redis
            .set::<(), _, _>(
                key,
                json,
                self.ttl_secs.map(Expiration::EX),
                None,
                false,
            )
            .await
            .map_err(|e| PersistenceError::Redis(e.to_string()))?;

        debug!(job_id = job.id, status = ?job.status, "Mirrored job");
        Ok(())
    }
}
