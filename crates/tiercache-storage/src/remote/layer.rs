//! Remote KV tier with retry and circuit breaking

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use tiercache_core::{CacheError, CacheKey, CacheLayer, CacheValue, LayerStats, Result, ValueCodec};

use super::circuit_breaker::CircuitBreaker;
use super::config::RemoteConfig;
use super::store::RemoteStore;

#[derive(Debug, Default)]
struct RemoteCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

/// A [`CacheLayer`] over a network key/value store.
///
/// Keys travel as their string form, values through the injected codec.
/// Every store call goes through bounded retries with a fixed delay, then
/// through the circuit breaker; once retries are exhausted or the breaker is
/// open the layer reports itself unavailable and the manager moves on to the
/// next tier or the loader.
pub struct RemoteLayer<K, V, C, S> {
    name: String,
    store: S,
    codec: C,
    breaker: CircuitBreaker,
    config: RemoteConfig,
    counters: RemoteCounters,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V, C, S> RemoteLayer<K, V, C, S>
where
    K: CacheKey,
    V: CacheValue,
    C: ValueCodec<V>,
    S: RemoteStore,
{
    /// Wrap a store with the given codec and config.
    pub fn new(store: S, codec: C, config: RemoteConfig) -> Self {
        let breaker = CircuitBreaker::new(config.breaker_failures, config.breaker_cooldown);
        Self {
            name: "remote".to_string(),
            store,
            codec,
            breaker,
            config,
            counters: RemoteCounters::default(),
            _marker: PhantomData,
        }
    }

    /// Override the name used in logs and metrics labels.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn full_key(&self, key: &K) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    /// Retry `op` on transient errors, then run it past the breaker.
    async fn guarded<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.breaker.allow_request() {
            return Err(CacheError::LayerUnavailable(format!(
                "{}: circuit open",
                self.name
            )));
        }

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match op().await {
                Ok(v) => break Ok(v),
                Err(e) if e.is_transient() && attempt < self.config.retry_count => {
                    tracing::debug!(
                        target: "tiercache",
                        layer = %self.name,
                        op = op_name,
                        attempt,
                        error = %e,
                        "remote operation failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        match result {
            Ok(v) => {
                self.breaker.report_success();
                Ok(v)
            }
            Err(e) => {
                self.breaker.report_failure();
                tracing::warn!(
                    target: "tiercache",
                    layer = %self.name,
                    op = op_name,
                    error = %e,
                    "remote operation failed after retries"
                );
                Err(CacheError::LayerUnavailable(format!("{op_name}: {e}")))
            }
        }
    }
}

#[async_trait]
impl<K, V, C, S> CacheLayer<K, V> for RemoteLayer<K, V, C, S>
where
    K: CacheKey,
    V: CacheValue,
    C: ValueCodec<V>,
    S: RemoteStore,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_get(&self, key: &K) -> Result<Option<V>> {
        let full = self.full_key(key);
        let bytes = self.guarded("get", || self.store.get_bytes(&full)).await?;

        match bytes {
            Some(bytes) => {
                let value = self.codec.decode(&bytes)?;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &K, value: V, ttl: Duration) -> Result<()> {
        let full = self.full_key(key);
        let bytes = self.codec.encode(&value)?;

        self.guarded("set", || self.store.set_bytes(&full, bytes.clone(), ttl))
            .await?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        let full = self.full_key(key);
        self.guarded("remove", || self.store.remove(&full)).await
    }

    async fn stats(&self) -> Result<LayerStats> {
        Ok(LayerStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            ..Default::default()
        })
    }
}
