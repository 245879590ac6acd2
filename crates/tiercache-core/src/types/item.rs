//! Cache item type

use std::time::{Duration, Instant};

/// A stored value with its expiry deadline.
///
/// Items are immutable after creation; writes replace the whole item.
#[derive(Debug, Clone)]
pub struct CacheItem<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheItem<V> {
    /// Create an item that expires `ttl` from now.
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    /// Create an item with an explicit deadline.
    pub fn with_deadline(value: V, expires_at: Instant) -> Self {
        Self { value, expires_at }
    }

    /// The stored value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consume the item, returning the value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// The expiry deadline.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Time left until expiry; zero if already expired.
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_item() {
        let item = CacheItem::new("v".to_string(), Duration::from_secs(60));
        assert!(!item.is_expired());
        assert!(item.remaining_ttl() > Duration::from_secs(59));
        assert_eq!(item.value(), "v");
    }

    #[test]
    fn test_expired_item() {
        let item = CacheItem::with_deadline(1u32, Instant::now() - Duration::from_secs(1));
        assert!(item.is_expired());
        assert_eq!(item.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let item = CacheItem::new(1u32, Duration::ZERO);
        assert!(item.is_expired());
    }
}
