//! Broadcast requests over Redis Pub/Sub.
//!
//! Other services publish a JSON [`BroadcastRequest`] on
//! `{prefix}:broadcasts`; every instance running an intake plans it.

use fred::clients::SubscriberClient;
use fred::error::Error as RedisError;
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subcast_common::BroadcastConfig;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::planner::{BroadcastPlanner, PlanOptions};

/// Channel carrying broadcast requests for `prefix`.
#[must_use]
pub fn broadcast_channel(prefix: &str) -> String {
    format!("{prefix}:broadcasts")
}

/// Broadcast request published by another service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    /// Target audience, resolved by the planner.
    pub segment: Value,
    /// Message text.
    pub text: String,
    /// Optional media reference.
    #[serde(default)]
    pub media: Option<String>,
    /// Overrides the configured chunk size.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Overrides the configured pause between chunk enqueues.
    #[serde(default)]
    pub pause_ms: Option<u64>,
}

impl BroadcastRequest {
    /// Planner input, with missing fields taken from `defaults`.
    #[must_use]
    pub fn into_plan(self, defaults: &BroadcastConfig) -> PlanOptions {
        let mut options = PlanOptions::with_defaults(self.segment, self.text, defaults);
        options.media = self.media;
        if let Some(chunk_size) = self.chunk_size {
            options.chunk_size = chunk_size;
        }
        if let Some(pause_ms) = self.pause_ms {
            options.pause = std::time::Duration::from_millis(pause_ms);
        }
        options
    }
}

/// Pub/Sub subscriber feeding the planner.
#[derive(Clone)]
pub struct BroadcastIntake {
    subscriber: SubscriberClient,
    channel: String,
    planner: BroadcastPlanner,
    defaults: BroadcastConfig,
}

impl BroadcastIntake {
    /// Connect a dedicated subscriber client.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect(
        redis_url: &str,
        prefix: &str,
        planner: BroadcastPlanner,
        defaults: BroadcastConfig,
    ) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;
        let subscriber = SubscriberClient::new(config, None, None, None);
        subscriber.init().await?;

        Ok(Self {
            subscriber,
            channel: broadcast_channel(prefix),
            planner,
            defaults,
        })
    }

    /// Subscribe and spawn the message loop.
    ///
    /// # Errors
    /// Returns an error if the subscription fails.
    pub async fn start(&self) -> Result<JoinHandle<()>, RedisError> {
        let mut messages = self.subscriber.message_rx();
        self.subscriber.subscribe(self.channel.as_str()).await?;
        info!(channel = %self.channel, "Subscribed to broadcast requests");

        let planner = self.planner.clone();
        let defaults = self.defaults.clone();

        Ok(tokio::spawn(async move {
            loop {
                match messages.recv().await {
                    Ok(message) => {
                        if let Some(payload) = message.value.as_string() {
                            handle_request(&planner, &defaults, &payload).await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Broadcast intake lagged, requests dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("Broadcast intake stream ended");
        }))
    }

    /// Unsubscribe and close the connection.
    pub async fn shutdown(&self) {
        if let Err(e) = self.subscriber.unsubscribe(self.channel.as_str()).await {
            warn!(error = %e, "Failed to unsubscribe broadcast channel");
        }
        if let Err(e) = self.subscriber.quit().await {
            warn!(error = %e, "Failed to close Redis subscriber");
        }
    }
}

/// Parse and plan one request. Problems are logged, never raised.
async fn handle_request(planner: &BroadcastPlanner, defaults: &BroadcastConfig, payload: &str) {
    let request: BroadcastRequest = match serde_json::from_str(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Malformed broadcast request skipped");
            return;
        }
    };

    debug!(text_len = request.text.len(), "Received broadcast request");
    match planner.plan(request.into_plan(defaults)).await {
        Ok(summary) => {
            info!(total = summary.total, chunks = summary.chunks, "Broadcast request planned");
        }
        Err(e) => e.log(),
    }
}
