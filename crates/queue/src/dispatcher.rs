//! Broadcast dispatcher.
//!
//! Sends one message to every recipient of a chunk, one at a time. The
//! messaging provider enforces a single global rate limit, so sends are never
//! issued concurrently; a fixed sleep after each send keeps the process under
//! the configured requests-per-second ceiling. A failed recipient is counted
//! and the batch moves on.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subcast_common::{Metrics, get_metrics};
use tracing::{debug, warn};

use crate::sender::SendError;

/// Chat id of a recipient on the messaging platform.
pub type RecipientId = i64;

/// Message delivered to each recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Message text.
    pub text: String,
    /// Optional media reference (file id or URL) attached to the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

impl OutboundMessage {
    /// Text-only message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media: None,
        }
    }

    /// Attach a media reference.
    #[must_use]
    pub fn with_media(mut self, media: impl Into<String>) -> Self {
        self.media = Some(media.into());
        self
    }
}

/// Aggregate outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    /// Recipients the message reached.
    pub success: usize,
    /// Recipients that could not be reached.
    pub failed: usize,
}

impl DispatchResult {
    /// Recipients attempted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.success + self.failed
    }
}

/// Delivers a message to one recipient, retries included.
#[async_trait]
pub trait SendOne: Send + Sync {
    /// Send `message` to `recipient`.
    async fn send(&self, recipient: RecipientId, message: &OutboundMessage)
    -> Result<(), SendError>;
}

#[async_trait]
impl<F, Fut> SendOne for F
where
    F: Fn(RecipientId, OutboundMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SendError>> + Send + 'static,
{
    async fn send(
        &self,
        recipient: RecipientId,
        message: &OutboundMessage,
    ) -> Result<(), SendError> {
        (self)(recipient, message.clone()).await
    }
}

/// Longest pause between two sends, however low the rate.
pub const MAX_SEND_INTERVAL: Duration = Duration::from_secs(3600);

/// Pause after each send for the given rate. `None` means unlimited.
fn send_interval(rate_per_second: f64) -> Option<Duration> {
    if rate_per_second > 0.0 && rate_per_second.is_finite() {
        let interval = Duration::try_from_secs_f64(1.0 / rate_per_second)
            .unwrap_or(MAX_SEND_INTERVAL);
        Some(interval.min(MAX_SEND_INTERVAL))
    } else {
        None
    }
}

/// Send a text message to every recipient in order.
pub async fn dispatch_audience<S>(
    ids: &[RecipientId],
    text: &str,
    rate_per_second: f64,
    send_one: &S,
) -> DispatchResult
where
    S: SendOne + ?Sized,
{
    dispatch_message(ids, &OutboundMessage::text(text), rate_per_second, send_one).await
}

/// Send `message` to every recipient in order.
///
/// Always returns with `success + failed == ids.len()`.
pub async fn dispatch_message<S>(
    ids: &[RecipientId],
    message: &OutboundMessage,
    rate_per_second: f64,
    send_one: &S,
) -> DispatchResult
where
    S: SendOne + ?Sized,
{
    dispatch_recorded(ids, message, rate_per_second, send_one, get_metrics()).await
}

/// [`dispatch_message`] recording recipient outcomes into `metrics`.
pub async fn dispatch_recorded<S>(
    ids: &[RecipientId],
    message: &OutboundMessage,
    rate_per_second: f64,
    send_one: &S,
    metrics: &Metrics,
) -> DispatchResult
where
    S: SendOne + ?Sized,
{
    let interval = send_interval(rate_per_second);
    let mut result = DispatchResult::default();

    for &recipient in ids {
        match send_one.send(recipient, message).await {
            Ok(()) => {
                result.success += 1;
                metrics.record_recipient(true);
            }
            Err(e) => {
                warn!(recipient, error = %e, "Failed to deliver to recipient");
                result.failed += 1;
                metrics.record_recipient(false);
            }
        }

        if let Some(interval) = interval {
            tokio::time::sleep(interval).await;
        }
    }

    debug!(
        success = result.success,
        failed = result.failed,
        "Dispatch finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_interval() {
        assert_eq!(send_interval(4.0), Some(Duration::from_millis(250)));
        assert_eq!(send_interval(0.0), None);
        assert_eq!(send_interval(-5.0), None);
        assert_eq!(send_interval(f64::INFINITY), None);
        assert_eq!(send_interval(f64::NAN), None);
        assert_eq!(send_interval(1e-30), Some(MAX_SEND_INTERVAL));
        assert_eq!(send_interval(f64::MIN_POSITIVE), Some(MAX_SEND_INTERVAL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_rate_is_clamped() {
        let send = |_: RecipientId, _: OutboundMessage| async { Ok::<(), SendError>(()) };

        let started = tokio::time::Instant::now();
        let result = dispatch_audience(&[1], "hi", 1e-30, &send).await;

        assert_eq!(result.success, 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= MAX_SEND_INTERVAL);
        assert!(elapsed < MAX_SEND_INTERVAL + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_recorded_into_given_metrics() {
        let send = |id: RecipientId, _: OutboundMessage| async move {
            if id == 2 {
                Err(SendError::Server(503))
            } else {
                Ok(())
            }
        };
        let metrics = Metrics::new();

        let result =
            dispatch_recorded(&[1, 2, 3], &OutboundMessage::text("hi"), 0.0, &send, &metrics).await;

        assert_eq!(result, DispatchResult { success: 2, failed: 1 });
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.recipients_delivered, 2);
        assert_eq!(snapshot.recipients_failed, 1);
    }

    #[tokio::test]
    async fn test_closure_sender_counts() {
        let send = |id: RecipientId, _msg: OutboundMessage| async move {
            if id % 2 == 0 {
                Ok(())
            } else {
                Err(SendError::Rejected(403))
            }
        };

        let result = dispatch_audience(&[1, 2, 3, 4, 6], "hi", 0.0, &send).await;
        assert_eq!(result, DispatchResult { success: 3, failed: 2 });
        assert_eq!(result.total(), 5);
    }

    #[tokio::test]
    async fn test_empty_audience() {
        let send = |_: RecipientId, _: OutboundMessage| async { Ok::<(), SendError>(()) };
        let result = dispatch_audience(&[], "hi", 25.0, &send).await;
        assert_eq!(result, DispatchResult::default());
    }

    #[test]
    fn test_message_serialization_omits_missing_media() {
        let value = serde_json::to_value(OutboundMessage::text("hello")).unwrap_or_default();
        assert_eq!(value, serde_json::json!({"text": "hello"}));
    }
}
