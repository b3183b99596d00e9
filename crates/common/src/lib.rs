//! Common utilities and shared types for subcast.
//!
//! This crate provides foundational components used across all subcast crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Metrics**: Queue and broadcast counters via [`Metrics`]
//!
//! # Example
//!
//! ```no_run
//! use subcast_common::{AppResult, Config};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     println!("Chunk size: {}", config.broadcast.chunk_size);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;

pub use config::{BroadcastConfig, Config, MessagingConfig, QueueConfig, RedisConfig};
pub use error::{AppError, AppResult};
pub use metrics::{JobOutcome, Metrics, MetricsSnapshot, Timer, get_metrics};
