//! Collaborator contracts: the loader and the persistent store

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tiercache_core::{CacheKey, CacheValue, Result};

/// Produces the authoritative value for a key on a cache miss.
///
/// The manager retries failures with exponential backoff and surfaces the
/// last error. Implementations are expected to honour `cancel`; background
/// refreshes pass a token that only fires on manager shutdown.
#[async_trait]
pub trait Loader<K, V>: Send + Sync + 'static {
    /// Load the value for `key`.
    async fn load(&self, key: &K, cancel: &CancellationToken) -> Result<V>;
}

/// Adapter turning an async closure into a [`Loader`].
///
/// The closure receives the key by value and may ignore cancellation.
pub struct FnLoader<F>(F);

impl<F> FnLoader<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<K, V, F, Fut> Loader<K, V> for FnLoader<F>
where
    K: CacheKey,
    V: CacheValue,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send,
{
    async fn load(&self, key: &K, _cancel: &CancellationToken) -> Result<V> {
        (self.0)(key.clone()).await
    }
}

/// The durable source of truth behind the cache.
///
/// Write-through treats a failure here as fatal; write-behind logs and
/// drops it.
#[async_trait]
pub trait PersistentStore<K, V>: Send + Sync + 'static {
    /// Durably record `value` for `key`.
    async fn persist(&self, key: &K, value: &V) -> Result<()>;
}

/// Adapter turning an async closure into a [`PersistentStore`].
pub struct FnPersistentStore<F>(F);

impl<F> FnPersistentStore<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<K, V, F, Fut> PersistentStore<K, V> for FnPersistentStore<F>
where
    K: CacheKey,
    V: CacheValue,
    F: Fn(K, V) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn persist(&self, key: &K, value: &V) -> Result<()> {
        (self.0)(key.clone(), value.clone()).await
    }
}
