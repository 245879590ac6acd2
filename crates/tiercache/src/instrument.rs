//! Latency instrumentation decorator

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use tiercache_core::{CacheEvents, CacheKey, CacheOp, CacheValue, MetricsSnapshot, Result};

use crate::manager::CacheManager;

/// A thin decorator around [`CacheManager`] that times every operation with
/// a monotonic clock, feeds the injected event sink (operation counters and
/// latency histograms when a metrics-backed sink is wired), and remembers
/// each key's most recent latency so snapshots can report it.
///
/// Observable behavior of the underlying manager is unchanged.
pub struct InstrumentedCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    manager: CacheManager<K, V>,
    events: Arc<dyn CacheEvents<K>>,
    last_latency_ms: DashMap<K, f64>,
}

impl<K, V> InstrumentedCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Wrap a manager, reporting timings to `events`.
    pub fn new(manager: CacheManager<K, V>, events: impl CacheEvents<K>) -> Self {
        Self {
            manager,
            events: Arc::new(events),
            last_latency_ms: DashMap::new(),
        }
    }

    /// The wrapped manager.
    pub fn manager(&self) -> &CacheManager<K, V> {
        &self.manager
    }

    /// Timed [`CacheManager::get_or_load`].
    pub async fn get_or_load(&self, key: &K, cancel: &CancellationToken) -> Result<V> {
        let start = Instant::now();
        let result = self.manager.get_or_load(key, cancel).await;
        self.observe(CacheOp::Get, key, start);
        result
    }

    /// Timed [`CacheManager::insert`].
    pub async fn insert(&self, key: &K, value: V) -> Result<()> {
        let start = Instant::now();
        let result = self.manager.insert(key, value).await;
        self.observe(CacheOp::Set, key, start);
        result
    }

    /// Timed [`CacheManager::invalidate`].
    pub async fn invalidate(&self, key: &K) -> Result<bool> {
        let start = Instant::now();
        let result = self.manager.invalidate(key).await;
        self.observe(CacheOp::Invalidate, key, start);
        result
    }

    /// Manager snapshot augmented with per-key last latencies.
    pub fn snapshot(&self, top_n: usize) -> MetricsSnapshot<K> {
        let mut snapshot = self.manager.snapshot(top_n);
        for (key, metrics) in snapshot.keys.iter_mut() {
            if let Some(latency) = self.last_latency_ms.get(key) {
                metrics.last_latency_ms = Some(*latency);
            }
        }
        snapshot
    }

    /// Close the wrapped manager.
    pub async fn close(&self) {
        self.manager.close().await;
    }

    fn observe(&self, op: CacheOp, key: &K, start: Instant) {
        let elapsed = start.elapsed();
        self.events.record_latency(op, elapsed);
        self.last_latency_ms
            .insert(key.clone(), elapsed.as_secs_f64() * 1000.0);
    }
}
