//! Job processors shipped with the crate.

mod send_batch;

pub use send_batch::SendBatchProcessor;
