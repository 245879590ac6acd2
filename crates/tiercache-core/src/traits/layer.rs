//! The cache layer contract

use std::fmt::Display;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;

use crate::{LayerStats, Result};

/// Bounds required of a cache key.
///
/// Keys are hashed by the in-memory tiers and stringified (`Display`) by the
/// remote tier, which uses the string form as its native key.
pub trait CacheKey: Eq + Hash + Clone + Display + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Display + Send + Sync + 'static {}

/// Bounds required of a cached value.
///
/// Values are opaque to the core; only the remote tier serializes them, via
/// an injected [`ValueCodec`](crate::ValueCodec).
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

/// Core trait for a single storage tier.
///
/// The manager composes an ordered stack of layers, fastest first, behind
/// this contract. Implementations include the basic in-memory layer, the
/// W-TinyLFU in-memory layer and the remote KV layer.
///
/// Failure policy: the manager logs `set` errors and continues; a `try_get`
/// error makes the manager fall through to the next layer. Implementations
/// must therefore never panic on internal faults.
#[async_trait]
pub trait CacheLayer<K, V>: Send + Sync + 'static
where
    K: CacheKey,
    V: CacheValue,
{
    /// Short name used in logs and metrics labels.
    fn name(&self) -> &str;

    /// Return the stored value if present and not expired.
    ///
    /// Expired entries are removed on access and reported as a miss.
    async fn try_get(&self, key: &K) -> Result<Option<V>>;

    /// Store `value` for at most `ttl`, replacing any prior value.
    async fn set(&self, key: &K, value: V, ttl: Duration) -> Result<()>;

    /// Insert a value found in a slower tier.
    ///
    /// The value already demonstrated demand, so layers with an admission
    /// policy must bypass it here. The default forwards to [`set`].
    ///
    /// [`set`]: CacheLayer::set
    async fn promote(&self, key: &K, value: V, ttl: Duration) -> Result<()> {
        self.set(key, value, ttl).await
    }

    /// Remove a key. Returns `true` if it was present.
    async fn remove(&self, key: &K) -> Result<bool>;

    /// Current layer counters.
    async fn stats(&self) -> Result<LayerStats>;

    /// Stop any background work owned by the layer (sweepers, decay timers).
    async fn close(&self) {}
}
