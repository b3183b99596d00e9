//! Background job queue and broadcast pipeline for subcast.
//!
//! - **Queue**: in-process job store with a deadline-ordered ready queue
//!   and a single worker task
//! - **Retry**: exponential backoff for jobs, bounded retry for sends
//! - **Planner**: splits a broadcast audience into chunk jobs
//! - **Dispatcher**: sends a chunk sequentially under a global rate limit
//! - **Sender**: HTTP client for the messaging API
//! - **Persistence**: best-effort job mirror (memory or Redis)
//! - **Flags**: feature flags (static or Redis)
//! - **Intake**: broadcast requests over Redis Pub/Sub

pub mod dispatcher;
pub mod flags;
pub mod intake;
pub mod job;
pub mod jobs;
pub mod persistence;
pub mod planner;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod sender;
pub mod store;
pub mod workers;

pub use dispatcher::{
    DispatchResult, MAX_SEND_INTERVAL, OutboundMessage, RecipientId, SendOne, dispatch_audience,
    dispatch_message, dispatch_recorded,
};
pub use flags::{BROADCASTS_ENABLED, FeatureFlags, RedisFlags, StaticFlags};
pub use intake::{BroadcastIntake, BroadcastRequest, broadcast_channel};
pub use job::{Backoff, EnqueueOptions, Job, JobId, JobStatus};
pub use jobs::*;
pub use persistence::{JobPersistence, MemoryJobMirror, PersistenceError, RedisJobMirror};
pub use planner::{BroadcastPlanner, PlanOptions, PlanSummary, resolve_audience};
pub use processor::{Processor, ProcessorError, ProcessorRegistry};
pub use queue::{JobQueue, JobQueueBuilder, NO_PROCESSOR, QueueError};
pub use retry::{RetryConfig, SendRetryPolicy};
pub use sender::{HttpMessageSender, HttpTransport, MessageTransport, RetryingSender, SendError};
pub use store::StoreStats;
pub use workers::*;
