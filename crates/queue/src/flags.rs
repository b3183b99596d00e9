//! Feature flags consulted by the broadcast pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use tracing::warn;

/// Flag gating [`crate::BroadcastPlanner::plan`].
pub const BROADCASTS_ENABLED: &str = "broadcasts_enabled";

/// Source of boolean feature flags.
#[async_trait]
pub trait FeatureFlags: Send + Sync {
    /// Read a flag, falling back to `default` when it is unknown.
    async fn get_flag(&self, name: &str, default: bool) -> bool;
}

/// Flags fixed at startup, usually the `[flags]` config table.
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    flags: HashMap<String, bool>,
}

impl StaticFlags {
    /// Create from a name to value map.
    #[must_use]
    pub const fn new(flags: HashMap<String, bool>) -> Self {
        Self { flags }
    }

    /// Set a flag.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: bool) -> Self {
        self.flags.insert(name.into(), value);
        self
    }
}

#[async_trait]
impl FeatureFlags for StaticFlags {
    async fn get_flag(&self, name: &str, default: bool) -> bool {
        self.flags.get(name).copied().unwrap_or(default)
    }
}

/// Flags stored in Redis under `{prefix}:flag:{name}`.
///
/// Operators flip them with a plain `SET`; no restart needed. A flag missing
/// from Redis falls back to the static flags, then to the caller's default.
#[derive(Clone)]
pub struct RedisFlags {
    redis: Arc<RedisClient>,
    prefix: String,
    fallback: StaticFlags,
}

impl RedisFlags {
    /// Create a flag reader.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            fallback: StaticFlags::default(),
        }
    }

    /// Values used when Redis has no entry or cannot be reached.
    #[must_use]
    pub fn with_fallback(mut self, fallback: StaticFlags) -> Self {
        self.fallback = fallback;
        self
    }

    fn flag_key(&self, name: &str) -> String {
        format!("{}:flag:{name}", self.prefix)
    }
}

#[async_trait]
impl FeatureFlags for RedisFlags {
    async fn get_flag(&self, name: &str, default: bool) -> bool {
        let default = self.fallback.get_flag(name, default).await;
        match self.redis.get::<Option<String>, _>(self.flag_key(name)).await {
            Ok(Some(raw)) => parse_flag(&raw).unwrap_or(default),
            Ok(None) => default,
            Err(e) => {
                warn!(flag = name, error = %e, "Failed to read feature flag");
                default
            }
        }
    }
}

/// Interpret a stored flag value. Unrecognised values yield `None`.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_flags_default() {
        let flags = StaticFlags::default().with(BROADCASTS_ENABLED, true);

        assert!(flags.get_flag(BROADCASTS_ENABLED, false).await);
        assert!(!flags.get_flag("unknown", false).await);
        assert!(flags.get_flag("unknown", true).await);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag("yes"), Some(true));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
