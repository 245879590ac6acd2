//! Basic in-memory cache tier using DashMap

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use tiercache_core::{CacheItem, CacheKey, CacheLayer, CacheValue, LayerStats, Result};

/// Configuration for the basic memory tier
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Interval of the background sweep that removes expired entries
    pub sweep_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

struct Shared<K, V> {
    data: DashMap<K, CacheItem<V>>,
    counters: MemoryCounters,
}

impl<K, V> Shared<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Remove every expired entry; returns the number removed.
    fn sweep(&self) -> usize {
        let before = self.data.len();
        self.data.retain(|_, item| !item.is_expired());
        let removed = before.saturating_sub(self.data.len());
        self.counters
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

/// A TTL-indexed concurrent map with a periodic expiry sweep.
///
/// The fastest tier without an admission policy. Cloning creates a new
/// handle to the SAME underlying store.
#[derive(Clone)]
pub struct MemoryLayer<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    name: String,
    shared: Arc<Shared<K, V>>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<K, V> MemoryLayer<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Create a new memory tier and start its sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: MemoryConfig) -> Self {
        let shared = Arc::new(Shared {
            data: DashMap::new(),
            counters: MemoryCounters::default(),
        });

        let sweep_target = Arc::clone(&shared);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                let removed = sweep_target.sweep();
                if removed > 0 {
                    tracing::debug!(target: "tiercache", removed, "memory sweep removed expired entries");
                }
            }
        });

        Self {
            name: "memory".to_string(),
            shared,
            sweeper: Arc::new(Mutex::new(Some(sweeper))),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MemoryConfig::default())
    }

    /// Override the name used in logs and metrics labels.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Blocking form of [`CacheLayer::try_get`].
    pub fn get_sync(&self, key: &K) -> Option<V> {
        match self.shared.data.get(key) {
            Some(item) if !item.is_expired() => {
                self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(item.value().value().clone())
            }
            Some(item) => {
                drop(item);
                // Expired: remove in place, report a miss.
                self.shared
                    .data
                    .remove_if(key, |_, item| item.is_expired());
                self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Blocking form of [`CacheLayer::set`].
    pub fn insert_sync(&self, key: K, value: V, ttl: Duration) {
        self.shared.data.insert(key, CacheItem::new(value, ttl));
        self.shared.counters.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Blocking form of [`CacheLayer::remove`].
    pub fn remove_sync(&self, key: &K) -> bool {
        self.shared.data.remove(key).is_some()
    }

    /// Number of live entries (including not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.shared.data.len()
    }

    /// Whether the tier holds no entries.
    pub fn is_empty(&self) -> bool {
        self.shared.data.is_empty()
    }

    /// Run one expiry sweep immediately; returns the number removed.
    pub fn sweep_now(&self) -> usize {
        self.shared.sweep()
    }

    fn stats_sync(&self) -> LayerStats {
        let c = &self.shared.counters;
        LayerStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            size: self.shared.data.len(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl<K, V> CacheLayer<K, V> for MemoryLayer<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.get_sync(key))
    }

    async fn set(&self, key: &K, value: V, ttl: Duration) -> Result<()> {
        self.insert_sync(key.clone(), value, ttl);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        Ok(self.remove_sync(key))
    }

    async fn stats(&self) -> Result<LayerStats> {
        Ok(self.stats_sync())
    }

    async fn close(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}
