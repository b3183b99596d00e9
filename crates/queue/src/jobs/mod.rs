//! Job payload definitions.

mod send_batch;

pub use send_batch::{SEND_BATCH_JOB, SendBatchJob};
