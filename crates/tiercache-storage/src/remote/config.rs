//! Configuration for the remote tier

use std::time::Duration;

/// Retry and circuit-breaker settings for the remote tier
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Maximum attempts per operation (first try included)
    pub retry_count: u32,

    /// Fixed delay between attempts
    pub retry_delay: Duration,

    /// Consecutive failures before the breaker opens
    pub breaker_failures: u32,

    /// How long the breaker stays open before admitting a probe
    pub breaker_cooldown: Duration,

    /// Optional prefix prepended to every key (e.g. "myapp")
    pub key_prefix: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_delay: Duration::from_millis(50),
            breaker_failures: 5,
            breaker_cooldown: Duration::from_secs(30),
            key_prefix: None,
        }
    }
}

impl RemoteConfig {
    /// Set the key prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }
}
