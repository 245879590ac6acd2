//! W-TinyLFU cache tier

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;

use tiercache_core::{CacheItem, CacheKey, CacheLayer, CacheValue, LayerStats, Result};

use super::bloom::BloomFilter;
use super::sample::SampleSet;
use super::sketch::CountMinSketch;

/// Configuration for the W-TinyLFU tier
#[derive(Debug, Clone)]
pub struct TinyLfuConfig {
    /// Maximum number of entries; eviction fires at this size
    pub max_size: usize,
    /// Count-Min sketch width (counters per row)
    pub sketch_width: usize,
    /// Count-Min sketch depth (rows)
    pub sketch_depth: usize,
    /// Bloom filter size in bits
    pub bloom_bits: usize,
    /// Bloom filter hash probes
    pub bloom_hashes: usize,
    /// Period of the sketch halving task
    pub decay_interval: Duration,
    /// Remaining-TTL window in which a hit counts as near expiry
    pub early_refresh_threshold: Duration,
    /// Gate cold keys through probabilistic admission
    pub admission_enabled: bool,
    /// Number of random keys examined per eviction
    pub eviction_samples: usize,
}

impl Default for TinyLfuConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            sketch_width: 1000,
            sketch_depth: 5,
            bloom_bits: 2000,
            bloom_hashes: 5,
            decay_interval: Duration::from_secs(300),
            early_refresh_threshold: Duration::from_secs(60),
            admission_enabled: true,
            eviction_samples: 5,
        }
    }
}

impl TinyLfuConfig {
    /// Create a config for the given capacity, sizing the Bloom filter to
    /// twice the capacity.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            bloom_bits: max_size * 2,
            ..Default::default()
        }
    }

    /// Disable the admission gate (eviction still applies).
    pub fn no_admission(mut self) -> Self {
        self.admission_enabled = false;
        self
    }
}

#[derive(Debug, Default)]
struct LfuCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    admissions: AtomicU64,
    rejections: AtomicU64,
    promotions: AtomicU64,
}

struct LfuShared<K, V> {
    data: DashMap<K, CacheItem<V>>,
    sketch: CountMinSketch,
    bloom: BloomFilter,
    samples: SampleSet<K>,
    near_expiry: DashMap<K, u64>,
    counters: LfuCounters,
    config: TinyLfuConfig,
}

impl<K, V> LfuShared<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn remove_entry(&self, key: &K) -> bool {
        let removed = self.data.remove(key).is_some();
        if removed {
            self.samples.remove(key);
            self.near_expiry.remove(key);
        }
        removed
    }

    /// Lowest-estimate key among a random sample, with its estimate.
    fn sample_victim(&self) -> Option<(K, u32)> {
        self.samples
            .sample(self.config.eviction_samples)
            .into_iter()
            .map(|k| {
                let freq = self.sketch.estimate(&k);
                (k, freq)
            })
            .min_by_key(|(_, freq)| *freq)
    }

    fn store(&self, key: K, value: V, ttl: Duration) {
        self.samples.insert(key.clone());
        self.data.insert(key, CacheItem::new(value, ttl));
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// The fastest tier: a TTL-indexed map gated by W-TinyLFU admission.
///
/// Every access feeds the Count-Min sketch. A set of a key the Bloom filter
/// has never seen must win a frequency contest against a sampled resident
/// before it may displace anything; at capacity, the least-frequent of a
/// random sample is evicted, and an incoming key colder than that victim is
/// rejected outright. A periodic decay halves the sketch so recency
/// dominates long-run frequency.
///
/// Cloning creates a new handle to the SAME underlying store.
#[derive(Clone)]
pub struct TinyLfuLayer<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    name: String,
    shared: Arc<LfuShared<K, V>>,
    decay_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<K, V> TinyLfuLayer<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Create a new tier and start its decay task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: TinyLfuConfig) -> Self {
        let shared = Arc::new(LfuShared {
            data: DashMap::with_capacity(config.max_size.min(10_000)),
            sketch: CountMinSketch::new(config.sketch_width, config.sketch_depth),
            bloom: BloomFilter::with_size(config.bloom_bits, config.bloom_hashes),
            samples: SampleSet::new(),
            near_expiry: DashMap::new(),
            counters: LfuCounters::default(),
            config,
        });

        let decay_target = Arc::clone(&shared);
        let decay_interval = decay_target.config.decay_interval;
        let decay_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(decay_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                decay_target.sketch.decay();
                tracing::trace!(target: "tiercache", "sketch decay tick");
            }
        });

        Self {
            name: "tinylfu".to_string(),
            shared,
            decay_task: Arc::new(Mutex::new(Some(decay_task))),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TinyLfuConfig::default())
    }

    /// Override the name used in logs and metrics labels.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.shared.data.len()
    }

    /// Whether the tier holds no entries.
    pub fn is_empty(&self) -> bool {
        self.shared.data.is_empty()
    }

    /// Whether the key is currently stored (expired or not).
    pub fn contains_key(&self, key: &K) -> bool {
        self.shared.data.contains_key(key)
    }

    /// How many hits this key took inside its soft-TTL window.
    pub fn near_expiry_hits(&self, key: &K) -> u64 {
        self.shared.near_expiry.get(key).map(|c| *c).unwrap_or(0)
    }

    /// The sketch's current frequency estimate for a key.
    pub fn frequency(&self, key: &K) -> u32 {
        self.shared.sketch.estimate(key)
    }

    /// Halve the sketch immediately.
    pub fn decay_now(&self) {
        self.shared.sketch.decay();
    }

    /// Blocking form of [`CacheLayer::try_get`].
    pub fn get_sync(&self, key: &K) -> Option<V> {
        let shared = &self.shared;
        shared.sketch.increment(key);

        match shared.data.get(key) {
            Some(item) if !item.is_expired() => {
                shared.counters.hits.fetch_add(1, Ordering::Relaxed);
                if item.remaining_ttl() <= shared.config.early_refresh_threshold {
                    *shared.near_expiry.entry(key.clone()).or_insert(0) += 1;
                }
                Some(item.value().value().clone())
            }
            Some(item) => {
                drop(item);
                shared.remove_entry(key);
                shared.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                shared.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Blocking form of [`CacheLayer::set`].
    ///
    /// Returns `false` when the admission policy rejected the write.
    pub fn insert_sync(&self, key: &K, value: V, ttl: Duration) -> bool {
        let shared = &self.shared;
        let config = &shared.config;
        shared.sketch.increment(key);

        // Cold keys must win a frequency contest before entering.
        if config.admission_enabled && !shared.bloom.contains(key) {
            shared.bloom.add(key);
            if !shared.data.is_empty() {
                let f_new = shared.sketch.estimate(key) as u64;
                let f_vic = shared
                    .sample_victim()
                    .map(|(_, freq)| freq as u64)
                    .unwrap_or(0);
                let p = f_new as f64 / (f_new + f_vic + 1) as f64;
                if !rand::rng().random_bool(p) {
                    shared.counters.rejections.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            }
        }

        if !shared.data.contains_key(key) && shared.data.len() >= config.max_size {
            if let Some((victim, victim_freq)) = shared.sample_victim() {
                if shared.sketch.estimate(key) < victim_freq {
                    shared.counters.rejections.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                shared.remove_entry(&victim);
                shared.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        shared.store(key.clone(), value, ttl);
        shared.counters.admissions.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn promote_sync(&self, key: &K, value: V, ttl: Duration) {
        let shared = &self.shared;

        // The value already demonstrated demand in a slower tier, so the
        // admission gate is bypassed; capacity eviction still applies.
        if !shared.data.contains_key(key) && shared.data.len() >= shared.config.max_size {
            if let Some((victim, _)) = shared.sample_victim() {
                shared.remove_entry(&victim);
                shared.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        shared.bloom.add(key);
        shared.store(key.clone(), value, ttl);
        shared.counters.promotions.fetch_add(1, Ordering::Relaxed);
    }

    fn stats_sync(&self) -> LayerStats {
        let c = &self.shared.counters;
        LayerStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            admissions: c.admissions.load(Ordering::Relaxed),
            rejections: c.rejections.load(Ordering::Relaxed),
            promotions: c.promotions.load(Ordering::Relaxed),
            size: self.shared.data.len(),
        }
    }
}

#[async_trait]
impl<K, V> CacheLayer<K, V> for TinyLfuLayer<K, V>
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
        self.insert_sync(key, value, ttl);
        Ok(())
    }

    async fn promote(&self, key: &K, value: V, ttl: Duration) -> Result<()> {
        self.promote_sync(key, value, ttl);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        Ok(self.shared.remove_entry(key))
    }

    async fn stats(&self) -> Result<LayerStats> {
        Ok(self.stats_sync())
    }

    async fn close(&self) {
        if let Some(handle) = self.decay_task.lock().take() {
            handle.abort();
        }
    }
}
