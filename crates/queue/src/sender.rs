//! Outbound message sender.
//!
//! A [`MessageTransport`] performs exactly one request. [`RetryingSender`]
//! wraps it with the per-recipient retry policy: rate-limit and server errors
//! are retried a bounded number of times, everything else fails at once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use subcast_common::{AppError, MessagingConfig, Metrics, get_metrics};
use tracing::{debug, warn};
use url::Url;

use crate::dispatcher::{OutboundMessage, RecipientId, SendOne};
use crate::retry::SendRetryPolicy;

/// Failure of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// HTTP 429. The provider may say how long to back off.
    #[error("Rate limited by messaging API")]
    RateLimited {
        /// Parsed `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx.
    #[error("Messaging API server error: HTTP {0}")]
    Server(u16),

    /// Any other non-success status, e.g. the recipient blocked the bot.
    #[error("Message rejected: HTTP {0}")]
    Rejected(u16),

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl SendError {
    /// Classify a non-success HTTP status.
    #[must_use]
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited { retry_after }
        } else if status.is_server_error() {
            Self::Server(status.as_u16())
        } else {
            Self::Rejected(status.as_u16())
        }
    }

    /// Whether another attempt could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Server(_))
    }

    /// Server-requested wait, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// One delivery attempt, without retries.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Try to deliver `message` to `recipient` once.
    async fn attempt(
        &self,
        recipient: RecipientId,
        message: &OutboundMessage,
    ) -> Result<(), SendError>;
}

/// [`SendOne`] implementation applying a [`SendRetryPolicy`] to a transport.
pub struct RetryingSender<T> {
    transport: T,
    policy: SendRetryPolicy,
    metrics: Arc<Metrics>,
}

impl<T: MessageTransport> RetryingSender<T> {
    /// Wrap a transport with the default policy.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            policy: SendRetryPolicy::default(),
            metrics: Arc::clone(get_metrics()),
        }
    }

    /// Use a different retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SendRetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Record into a different metrics instance.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The wrapped transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: MessageTransport> SendOne for RetryingSender<T> {
    async fn send(
        &self,
        recipient: RecipientId,
        message: &OutboundMessage,
    ) -> Result<(), SendError> {
        let mut attempt = 1;
        loop {
            match self.transport.attempt(recipient, message).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_after(attempt, e.retry_after());
                    debug!(
                        recipient,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying send"
                    );
                    self.metrics.record_send_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Request body understood by the messaging API.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    chat_id: RecipientId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<&'a str>,
}

/// HTTP transport posting JSON to the messaging API.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpTransport {
    /// Build the transport from configuration.
    ///
    /// # Errors
    /// Returns an error if the endpoint is not an http(s) URL or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &MessagingConfig) -> Result<Self, AppError> {
        let endpoint = config.endpoint_url()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            token: Some(config.token.clone()).filter(|t| !t.is_empty()),
        })
    }

    /// Configured endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl MessageTransport for HttpTransport {
    async fn attempt(
        &self,
        recipient: RecipientId,
        message: &OutboundMessage,
    ) -> Result<(), SendError> {
        let body = SendMessageBody {
            chat_id: recipient,
            text: &message.text,
            media: message.media.as_deref(),
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        let error = SendError::from_status(status, retry_after);
        if !error.is_transient() {
            let text = response.text().await.unwrap_or_default();
            warn!(recipient, status = status.as_u16(), body = %text, "Message rejected");
        }
        Err(error)
    }
}

/// Sender used in production: HTTP transport plus the retry policy.
pub type HttpMessageSender = RetryingSender<HttpTransport>;

impl HttpMessageSender {
    /// Build the sender from configuration.
    ///
    /// # Errors
    /// See [`HttpTransport::from_config`].
    pub fn from_config(config: &MessagingConfig) -> Result<Self, AppError> {
        Ok(Self::new(HttpTransport::from_config(config)?))
    }
}

/// Parse a `Retry-After` value given as seconds or as an HTTP date.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok()
}
