//! Broadcast chunk job.

use serde::{Deserialize, Serialize};

use crate::dispatcher::{OutboundMessage, RecipientId};

/// Job type of one broadcast chunk.
pub const SEND_BATCH_JOB: &str = "broadcast:sendBatch";

/// Job to send one message to a chunk of recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBatchJob {
    /// Recipients in this chunk, in send order.
    pub user_ids: Vec<RecipientId>,

    /// Message text.
    pub text: String,

    /// Optional media reference.
    #[serde(default)]
    pub media: Option<String>,
}

impl SendBatchJob {
    /// Create a new chunk job.
    #[must_use]
    pub const fn new(user_ids: Vec<RecipientId>, text: String, media: Option<String>) -> Self {
        Self {
            user_ids,
            text,
            media,
        }
    }

    /// Message delivered to every recipient of the chunk.
    #[must_use]
    pub fn message(&self) -> OutboundMessage {
        OutboundMessage {
            text: self.text.clone(),
            media: self.media.clone(),
        }
    }
}
