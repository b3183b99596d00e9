//! Application configuration.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Job queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Broadcast defaults.
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    /// Outbound messaging API configuration.
    #[serde(default)]
    pub messaging: MessagingConfig,
    /// Static feature flags.
    #[serde(default)]
    pub flags: HashMap<String, bool>,
    /// Redis configuration. Mirroring, Redis flags and intake are off without it.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// Job queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Idle poll interval of the worker loop in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Base delay of the job retry backoff in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound of the job retry backoff in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Attempts granted to a job when the enqueuer does not say otherwise.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Maximum number of jobs waiting in the ready queue. Unbounded when unset.
    #[serde(default)]
    pub max_depth: Option<usize>,
}

/// Broadcast defaults applied when a request omits them.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Recipients per chunk job.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pause between chunk enqueues in milliseconds.
    #[serde(default)]
    pub pause_ms: u64,
    /// Sends per second against the messaging API. Zero or less means unlimited.
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: f64,
}

/// Outbound messaging API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    /// Message-send endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bearer token sent with every request. Omitted when empty.
    #[serde(default)]
    pub token: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// User agent header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    /// Expiry of mirrored job records in seconds. Records never expire when unset.
    #[serde(default)]
    pub job_ttl_secs: Option<u64>,
    /// Whether to subscribe to broadcast requests over Pub/Sub.
    #[serde(default = "default_true")]
    pub intake: bool,
}

const fn default_poll_interval_ms() -> u64 {
    50
}

const fn default_backoff_base_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_chunk_size() -> usize {
    25
}

const fn default_rate_per_second() -> f64 {
    25.0
}

fn default_endpoint() -> String {
    "http://localhost:8081/sendMessage".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("subcast/{}", env!("CARGO_PKG_VERSION"))
}

fn default_redis_prefix() -> String {
    "subcast".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            default_max_attempts: default_max_attempts(),
            max_depth: None,
        }
    }
}

impl QueueConfig {
    /// Idle poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Base delay of the job retry backoff.
    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Upper bound of the job retry backoff.
    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            pause_ms: 0,
            rate_per_second: default_rate_per_second(),
        }
    }
}

impl BroadcastConfig {
    /// Pause between chunk enqueues.
    #[must_use]
    pub const fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: String::new(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl MessagingConfig {
    /// Parse and check the configured endpoint.
    pub fn endpoint_url(&self) -> Result<url::Url, config::ConfigError> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| config::ConfigError::Message(format!("messaging.endpoint: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(config::ConfigError::Message(format!(
                "messaging.endpoint: unsupported scheme {other}"
            ))),
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `SUBCAST_ENV`)
    /// 3. Environment variables with `SUBCAST__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("SUBCAST_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("SUBCAST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.queue.poll_interval_ms, 50);
        assert_eq!(config.queue.backoff_base(), Duration::from_secs(1));
        assert_eq!(config.queue.max_backoff(), Duration::from_secs(30));
        assert_eq!(config.queue.default_max_attempts, 5);
        assert!(config.queue.max_depth.is_none());
        assert_eq!(config.broadcast.chunk_size, 25);
        assert!(config.redis.is_none());
        assert!(config.flags.is_empty());
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            [queue]
            backoff_base_ms = 10
            max_depth = 1000

            [broadcast]
            chunk_size = 50
            rate_per_second = 0.0

            [flags]
            broadcasts_enabled = true

            [redis]
            url = "redis://localhost:6379"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.backoff_base(), Duration::from_millis(10));
        assert_eq!(config.queue.max_depth, Some(1000));
        assert_eq!(config.broadcast.chunk_size, 50);
        assert!(config.broadcast.rate_per_second <= 0.0);
        assert_eq!(config.flags.get("broadcasts_enabled"), Some(&true));

        let redis = config.redis.unwrap();
        assert_eq!(redis.prefix, "subcast");
        assert!(redis.intake);
        assert!(redis.job_ttl_secs.is_none());
    }

    #[test]
    fn test_endpoint_url_validation() {
        let mut messaging = MessagingConfig::default();
        assert!(messaging.endpoint_url().is_ok());

        messaging.endpoint = "ftp://example.com/send".to_string();
        assert!(messaging.endpoint_url().is_err());

        messaging.endpoint = "not a url".to_string();
        assert!(messaging.endpoint_url().is_err());
    }
}
