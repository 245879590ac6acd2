//! Write propagation strategies

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::task::TaskTracker;

use tiercache_core::{CacheError, CacheKey, CacheLayer, CacheValue, Result};

use crate::loader::PersistentStore;

/// Strategy for propagating a write across the layer stack and to the
/// persistent store.
///
/// `ttls` is the per-layer TTL array, already jittered by the manager; when
/// shorter than the layer stack, `default_ttl` fills in.
#[async_trait]
pub trait WritePolicy<K, V>: Send + Sync + 'static
where
    K: CacheKey,
    V: CacheValue,
{
    /// The base TTL this policy writes with; the manager derives the
    /// soft-TTL refresh window from it.
    fn default_ttl(&self) -> Duration;

    /// Propagate a write.
    async fn write(
        &self,
        key: &K,
        value: V,
        layers: &[Arc<dyn CacheLayer<K, V>>],
        store: Option<Arc<dyn PersistentStore<K, V>>>,
        ttls: &[Duration],
    ) -> Result<()>;

    /// Wait for any asynchronous propagation still in flight.
    async fn close(&self) {}
}

fn ttl_for(ttls: &[Duration], idx: usize, default_ttl: Duration) -> Duration {
    ttls.get(idx).copied().unwrap_or(default_ttl)
}

/// Synchronous propagation to every layer, then the persistent store.
///
/// Individual layer failures are logged and do not abort the remaining
/// layers; a persistent-store failure is fatal because persistence is the
/// source of truth.
pub struct WriteThrough {
    default_ttl: Duration,
}

impl WriteThrough {
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl }
    }
}

#[async_trait]
impl<K, V> WritePolicy<K, V> for WriteThrough
where
    K: CacheKey,
    V: CacheValue,
{
    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn write(
        &self,
        key: &K,
        value: V,
        layers: &[Arc<dyn CacheLayer<K, V>>],
        store: Option<Arc<dyn PersistentStore<K, V>>>,
        ttls: &[Duration],
    ) -> Result<()> {
        for (i, layer) in layers.iter().enumerate() {
            let ttl = ttl_for(ttls, i, self.default_ttl);
            if let Err(e) = layer.set(key, value.clone(), ttl).await {
                tracing::warn!(
                    target: "tiercache",
                    layer = layer.name(),
                    key = %key,
                    error = %e,
                    "write-through layer set failed"
                );
            }
        }

        match store {
            Some(store) => store
                .persist(key, &value)
                .await
                .map_err(|e| CacheError::PersistenceFailed(e.to_string())),
            None => {
                tracing::warn!(
                    target: "tiercache",
                    key = %key,
                    "no persistent store configured, treating write as durable"
                );
                Ok(())
            }
        }
    }
}

/// Synchronous write to the fastest layer only; the rest of the stack and
/// the persistent store are filled in by a detached task.
///
/// The synchronous path never fails on non-layer-0 issues. No ordering is
/// guaranteed between concurrent writes of the same key: last writer wins.
pub struct WriteBehind {
    default_ttl: Duration,
    tasks: TaskTracker,
}

impl WriteBehind {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            tasks: TaskTracker::new(),
        }
    }
}

#[async_trait]
impl<K, V> WritePolicy<K, V> for WriteBehind
where
    K: CacheKey,
    V: CacheValue,
{
    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn write(
        &self,
        key: &K,
        value: V,
        layers: &[Arc<dyn CacheLayer<K, V>>],
        store: Option<Arc<dyn PersistentStore<K, V>>>,
        ttls: &[Duration],
    ) -> Result<()> {
        if let Some(fastest) = layers.first() {
            let ttl = ttl_for(ttls, 0, self.default_ttl);
            if let Err(e) = fastest.set(key, value.clone(), ttl).await {
                tracing::warn!(
                    target: "tiercache",
                    layer = fastest.name(),
                    key = %key,
                    error = %e,
                    "write-behind fastest-layer set failed"
                );
            }
        }

        let key = key.clone();
        let rest: Vec<Arc<dyn CacheLayer<K, V>>> = layers.iter().skip(1).cloned().collect();
        let rest_ttls: Vec<Duration> = (1..layers.len())
            .map(|i| ttl_for(ttls, i, self.default_ttl))
            .collect();

        self.tasks.spawn(async move {
            for (layer, ttl) in rest.iter().zip(rest_ttls) {
                if let Err(e) = layer.set(&key, value.clone(), ttl).await {
                    tracing::warn!(
                        target: "tiercache",
                        layer = layer.name(),
                        key = %key,
                        error = %e,
                        "write-behind fan-out set failed"
                    );
                }
            }

            match store {
                Some(store) => {
                    if let Err(e) = store.persist(&key, &value).await {
                        tracing::warn!(
                            target: "tiercache",
                            key = %key,
                            error = %e,
                            "write-behind persistence failed, value dropped"
                        );
                    }
                }
                None => {
                    tracing::warn!(
                        target: "tiercache",
                        key = %key,
                        "no persistent store configured, treating write as durable"
                    );
                }
            }
        });

        Ok(())
    }

    async fn close(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
