//! The cache manager
//!
//! Orchestrates the layer stack: cross-layer lookup with fall-through on
//! error, promotion of hits into faster layers, single-flight miss loading
//! with retries, pro-active refresh of values nearing expiry, TTL jitter,
//! and per-key telemetry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tiercache_core::{
    CacheError, CacheEvents, CacheKey, CacheLayer, CacheOp, CacheValue, KeyMetrics,
    MetricsSnapshot, NoopEvents, Result,
};

use crate::loader::{Loader, PersistentStore};
use crate::policy::{WritePolicy, WriteThrough};

mod single_flight;
use single_flight::{Flight, SingleFlight};

/// Which faster layers receive a value after a hit in a slower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromotionPolicy {
    /// Never promote
    None,
    /// Only the fastest layer
    FirstLayerOnly,
    /// Every layer above the one that hit
    #[default]
    AllHigherLayers,
}

/// Configuration for [`CacheManager`]
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Base TTL; also the default element of `layer_ttls`
    pub default_ttl: Duration,
    /// Per-layer TTL override, fastest first; padded with `default_ttl`
    pub layer_ttls: Vec<Duration>,
    /// Soft-TTL window before hard expiry in which hits trigger a refresh
    pub early_refresh_threshold: Duration,
    /// Minimum interval between two refreshes of the same key
    pub min_refresh_interval: Duration,
    /// Global cap on concurrently running early refreshes
    pub max_concurrent_early_refreshes: usize,
    /// Uniform TTL perturbation, as a fraction in [0, 1]
    pub ttl_jitter_fraction: f64,
    /// Promotion targets on a hit in a slower layer
    pub promotion_policy: PromotionPolicy,
    /// Period of the per-key state garbage collection
    pub stale_key_cleanup_interval: Duration,
    /// Age beyond which per-key state is garbage collected
    pub stale_key_threshold: Duration,
    /// Maximum loader attempts per miss
    pub max_retries: u32,
    /// First retry backoff; doubles per attempt
    pub retry_base_delay: Duration,
    /// Fail writes instead of warning when no persistent store is wired
    pub require_persistent_store: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            layer_ttls: Vec::new(),
            early_refresh_threshold: Duration::from_secs(60),
            min_refresh_interval: Duration::from_secs(30),
            max_concurrent_early_refreshes: 10,
            ttl_jitter_fraction: 0.1,
            promotion_policy: PromotionPolicy::AllHigherLayers,
            stale_key_cleanup_interval: Duration::from_secs(600),
            stale_key_threshold: Duration::from_secs(3600),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            require_persistent_store: false,
        }
    }
}

impl ManagerConfig {
    /// Create config with a specific base TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            default_ttl: ttl,
            ..Default::default()
        }
    }

    /// Disable TTL jitter
    pub fn no_jitter(mut self) -> Self {
        self.ttl_jitter_fraction = 0.0;
        self
    }
}

#[derive(Debug)]
struct KeyState {
    /// When the value was last produced by the loader or an explicit write
    last_refresh_at: Option<Instant>,
    /// When this state record was created; GC anchor for never-refreshed keys
    touched_at: Instant,
    hits: u64,
    misses: u64,
    promotions: u64,
    early_refreshes: u64,
}

impl KeyState {
    fn new() -> Self {
        Self {
            last_refresh_at: None,
            touched_at: Instant::now(),
            hits: 0,
            misses: 0,
            promotions: 0,
            early_refreshes: 0,
        }
    }

    fn stale_anchor(&self) -> Instant {
        self.last_refresh_at.unwrap_or(self.touched_at)
    }
}

#[derive(Debug, Default)]
struct Totals {
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    early_refreshes: AtomicU64,
}

struct Inner<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    layers: Vec<Arc<dyn CacheLayer<K, V>>>,
    layer_ttls: Vec<Duration>,
    loader: Arc<dyn Loader<K, V>>,
    write_policy: Arc<dyn WritePolicy<K, V>>,
    store: Option<Arc<dyn PersistentStore<K, V>>>,
    events: Arc<dyn CacheEvents<K>>,
    config: ManagerConfig,

    keys: DashMap<K, KeyState>,
    key_locks: DashMap<K, Arc<Mutex<()>>>,
    flights: SingleFlight<K, V>,
    refresh_slots: Arc<Semaphore>,
    totals: Totals,

    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// Multi-tier read-through cache manager.
///
/// Cloning creates a new handle to the SAME manager; all clones share the
/// layer stack, coordination state and background tasks.
pub struct CacheManager<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for CacheManager<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`CacheManager`]
pub struct CacheManagerBuilder<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    layers: Vec<Arc<dyn CacheLayer<K, V>>>,
    loader: Arc<dyn Loader<K, V>>,
    write_policy: Option<Arc<dyn WritePolicy<K, V>>>,
    store: Option<Arc<dyn PersistentStore<K, V>>>,
    events: Arc<dyn CacheEvents<K>>,
    config: ManagerConfig,
}

impl<K, V> CacheManagerBuilder<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Append a layer; layers are consulted in the order added, fastest
    /// first.
    pub fn layer(mut self, layer: Arc<dyn CacheLayer<K, V>>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Replace the default write-through policy.
    pub fn write_policy(mut self, policy: impl WritePolicy<K, V>) -> Self {
        self.write_policy = Some(Arc::new(policy));
        self
    }

    /// Wire the durable source of truth.
    pub fn persistent_store(mut self, store: impl PersistentStore<K, V>) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Replace the no-op event sink.
    pub fn events(mut self, events: impl CacheEvents<K>) -> Self {
        self.events = Arc::new(events);
        self
    }

    /// Replace the default configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the manager and start its stale-key cleanup task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> CacheManager<K, V> {
        let mut config = self.config;
        config.ttl_jitter_fraction = config.ttl_jitter_fraction.clamp(0.0, 1.0);

        let mut layer_ttls = config.layer_ttls.clone();
        layer_ttls.resize(self.layers.len(), config.default_ttl);

        let write_policy = self
            .write_policy
            .unwrap_or_else(|| Arc::new(WriteThrough::new(config.default_ttl)));

        let refresh_slots = Arc::new(Semaphore::new(config.max_concurrent_early_refreshes.max(1)));
        let cleanup_interval = config.stale_key_cleanup_interval;

        let inner = Arc::new(Inner {
            layers: self.layers,
            layer_ttls,
            loader: self.loader,
            write_policy,
            store: self.store,
            events: self.events,
            config,
            keys: DashMap::new(),
            key_locks: DashMap::new(),
            flights: SingleFlight::new(),
            refresh_slots,
            totals: Totals::default(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&inner);
        let shutdown = inner.shutdown.clone();
        inner.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let removed = cleanup_stale(&inner);
                        if removed > 0 {
                            tracing::debug!(target: "tiercache", removed, "stale per-key state collected");
                        }
                    }
                }
            }
        });

        CacheManager { inner }
    }
}

/// Drop coordination state for keys not refreshed within the stale
/// threshold; returns how many were collected. Layer contents are left to
/// expire by TTL.
fn cleanup_stale<K, V>(inner: &Inner<K, V>) -> usize
where
    K: CacheKey,
    V: CacheValue,
{
    let threshold = inner.config.stale_key_threshold;
    let stale: Vec<K> = inner
        .keys
        .iter()
        .filter(|entry| entry.stale_anchor().elapsed() > threshold)
        .map(|entry| entry.key().clone())
        .collect();

    for key in &stale {
        inner.keys.remove(key);
        inner.key_locks.remove(key);
        inner.flights.remove(key);
    }
    stale.len()
}

impl<K, V> CacheManager<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Start building a manager around the given loader.
    pub fn builder(loader: impl Loader<K, V>) -> CacheManagerBuilder<K, V> {
        CacheManagerBuilder {
            layers: Vec::new(),
            loader: Arc::new(loader),
            write_policy: None,
            store: None,
            events: Arc::new(NoopEvents),
            config: ManagerConfig::default(),
        }
    }

    /// The configured layer stack, fastest first.
    pub fn layers(&self) -> &[Arc<dyn CacheLayer<K, V>>] {
        &self.inner.layers
    }

    /// Total early refreshes completed since construction.
    pub fn global_early_refresh_count(&self) -> u64 {
        self.inner.totals.early_refreshes.load(Ordering::Relaxed)
    }

    /// Read a value through the layer stack, loading it on a full miss.
    ///
    /// A hit is promoted to faster layers per the promotion policy and may
    /// trigger an early refresh when inside the soft-TTL window. Concurrent
    /// misses on the same key share one loader invocation; `cancel` releases
    /// this caller without disturbing the shared load.
    pub async fn get_or_load(&self, key: &K, cancel: &CancellationToken) -> Result<V> {
        let inner = &self.inner;

        for (idx, layer) in inner.layers.iter().enumerate() {
            match layer.try_get(key).await {
                Ok(Some(value)) => {
                    self.with_state(key, |st| st.hits += 1);
                    inner.totals.hits.fetch_add(1, Ordering::Relaxed);
                    inner.events.on_hit(key, layer.name());
                    if idx > 0 {
                        self.spawn_promotion(key, &value, idx);
                    }
                    self.maybe_refresh(key);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        target: "tiercache",
                        layer = layer.name(),
                        key = %key,
                        error = %e,
                        "layer read failed, falling through"
                    );
                }
            }
        }

        self.with_state(key, |st| st.misses += 1);
        inner.totals.misses.fetch_add(1, Ordering::Relaxed);
        inner.events.on_miss(key);

        self.load_coalesced(key, cancel).await
    }

    /// Write a value through the configured write policy with jittered
    /// per-layer TTLs.
    pub async fn insert(&self, key: &K, value: V) -> Result<()> {
        self.with_state(key, |st| st.last_refresh_at = Some(Instant::now()));
        self.write_via_policy(key, value).await
    }

    /// Remove a key from every layer and drop its coordination state.
    pub async fn invalidate(&self, key: &K) -> Result<bool> {
        let mut removed = false;
        for layer in &self.inner.layers {
            match layer.remove(key).await {
                Ok(r) => removed |= r,
                Err(e) => {
                    tracing::warn!(
                        target: "tiercache",
                        layer = layer.name(),
                        key = %key,
                        error = %e,
                        "layer remove failed"
                    );
                }
            }
        }
        self.inner.keys.remove(key);
        self.inner.key_locks.remove(key);
        Ok(removed)
    }

    /// Capture an immutable telemetry snapshot with the `top_n` most
    /// accessed keys.
    pub fn snapshot(&self, top_n: usize) -> MetricsSnapshot<K> {
        let inner = &self.inner;

        let mut keys = HashMap::with_capacity(inner.keys.len());
        for entry in inner.keys.iter() {
            keys.insert(
                entry.key().clone(),
                KeyMetrics {
                    hits: entry.hits,
                    misses: entry.misses,
                    promotions: entry.promotions,
                    early_refreshes: entry.early_refreshes,
                    last_refresh_at: entry.last_refresh_at,
                    last_latency_ms: None,
                },
            );
        }

        let mut top_keys: Vec<(K, u64)> = keys
            .iter()
            .map(|(k, m)| (k.clone(), m.hits))
            .collect();
        top_keys.sort_by(|a, b| b.1.cmp(&a.1));
        top_keys.truncate(top_n);

        MetricsSnapshot {
            keys,
            inflight: inner.flights.inflight_keys(),
            total_hits: inner.totals.hits.load(Ordering::Relaxed),
            total_misses: inner.totals.misses.load(Ordering::Relaxed),
            total_promotions: inner.totals.promotions.load(Ordering::Relaxed),
            total_early_refreshes: inner.totals.early_refreshes.load(Ordering::Relaxed),
            top_keys,
        }
    }

    /// Stop background tasks and wait for in-flight work to finish.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        for layer in &self.inner.layers {
            layer.close().await;
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.write_policy.close().await;
    }

    // ---- internals ----

    fn with_state(&self, key: &K, f: impl FnOnce(&mut KeyState)) {
        if let Some(mut state) = self.inner.keys.get_mut(key) {
            f(&mut state);
            return;
        }
        let mut entry = self
            .inner
            .keys
            .entry(key.clone())
            .or_insert_with(KeyState::new);
        f(entry.value_mut());
    }

    fn key_lock(&self, key: &K) -> Arc<Mutex<()>> {
        if let Some(lock) = self.inner.key_locks.get(key) {
            return Arc::clone(&lock);
        }
        Arc::clone(
            &self
                .inner
                .key_locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn jittered(&self, base: Duration) -> Duration {
        let f = self.inner.config.ttl_jitter_fraction;
        if f <= 0.0 {
            return base;
        }
        let u = rand::rng().random_range(-f..=f);
        base.mul_f64(1.0 + u)
    }

    async fn write_via_policy(&self, key: &K, value: V) -> Result<()> {
        let inner = &self.inner;
        if inner.store.is_none() && inner.config.require_persistent_store {
            return Err(CacheError::PersistenceFailed(
                "no persistent store configured".to_string(),
            ));
        }

        let ttls: Vec<Duration> = inner.layer_ttls.iter().map(|t| self.jittered(*t)).collect();
        inner
            .write_policy
            .write(key, value, &inner.layers, inner.store.clone(), &ttls)
            .await
    }

    fn spawn_promotion(&self, key: &K, value: &V, found_idx: usize) {
        let targets: Vec<usize> = match self.inner.config.promotion_policy {
            PromotionPolicy::None => return,
            PromotionPolicy::FirstLayerOnly => vec![0],
            PromotionPolicy::AllHigherLayers => (0..found_idx).collect(),
        };

        let mgr = self.clone();
        let key = key.clone();
        let value = value.clone();
        self.inner.tasks.spawn(async move {
            for idx in targets {
                let layer = &mgr.inner.layers[idx];
                let ttl = mgr.jittered(mgr.inner.layer_ttls[idx]);
                match layer.promote(&key, value.clone(), ttl).await {
                    Ok(()) => {
                        mgr.with_state(&key, |st| st.promotions += 1);
                        mgr.inner.totals.promotions.fetch_add(1, Ordering::Relaxed);
                        mgr.inner.events.on_promotion(&key, layer.name());
                    }
                    Err(e) => {
                        tracing::warn!(
                            target: "tiercache",
                            layer = layer.name(),
                            key = %key,
                            error = %e,
                            "promotion write failed"
                        );
                    }
                }
            }
        });
    }

    /// Kick off a background refresh when the key's value is inside its
    /// soft-TTL window, subject to the per-key throttle and the global slot
    /// cap.
    fn maybe_refresh(&self, key: &K) {
        let inner = &self.inner;

        let Some(last) = inner.keys.get(key).and_then(|st| st.last_refresh_at) else {
            return;
        };
        let age = last.elapsed();

        let soft_window_start = inner
            .write_policy
            .default_ttl()
            .saturating_sub(inner.config.early_refresh_threshold);
        if age < soft_window_start {
            return;
        }
        if age < inner.config.min_refresh_interval {
            return;
        }
        let Ok(permit) = Arc::clone(&inner.refresh_slots).try_acquire_owned() else {
            return;
        };

        let mgr = self.clone();
        let key = key.clone();
        inner.tasks.spawn(async move {
            let _permit = permit;

            // Spread refresh bursts out before taking the key lock.
            let jitter = Duration::from_millis(rand::rng().random_range(0..500));
            tokio::time::sleep(jitter).await;

            let lock = mgr.key_lock(&key);
            let _guard = lock.lock().await;

            // A refresh that finished while this task waited makes this one
            // redundant.
            if let Some(last) = mgr.inner.keys.get(&key).and_then(|st| st.last_refresh_at) {
                if last.elapsed() < mgr.inner.config.min_refresh_interval {
                    return;
                }
            }

            let cancel = mgr.inner.shutdown.child_token();
            let started = Instant::now();
            match mgr.inner.loader.load(&key, &cancel).await {
                Err(e) => {
                    tracing::warn!(
                        target: "tiercache",
                        key = %key,
                        error = %e,
                        "early refresh load failed"
                    );
                    mgr.inner.events.on_load_failure(&key);
                }
                Ok(value) => match mgr.write_via_policy(&key, value).await {
                    Err(e) => {
                        tracing::warn!(
                            target: "tiercache",
                            key = %key,
                            error = %e,
                            "early refresh write failed"
                        );
                    }
                    Ok(()) => {
                        mgr.with_state(&key, |st| {
                            st.last_refresh_at = Some(Instant::now());
                            st.early_refreshes += 1;
                        });
                        mgr.inner
                            .totals
                            .early_refreshes
                            .fetch_add(1, Ordering::Relaxed);
                        mgr.inner.events.on_early_refresh(&key);
                        mgr.inner
                            .events
                            .record_latency(CacheOp::EarlyRefresh, started.elapsed());
                    }
                },
            }
        });
    }

    async fn load_coalesced(&self, key: &K, cancel: &CancellationToken) -> Result<V> {
        let mut rx = match self.inner.flights.join_or_lead(key) {
            Flight::Follower(rx) => rx,
            Flight::Leader(tx) => {
                // The load runs detached so a cancelled caller never tears
                // it down for the other waiters.
                let rx = tx.subscribe();
                let mgr = self.clone();
                let key = key.clone();
                self.inner.tasks.spawn(async move {
                    let result = mgr.run_load(&key, &tx).await;
                    mgr.inner.flights.complete(&key, &tx, result);
                });
                rx
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
            outcome = rx.recv() => match outcome {
                Ok(result) => result,
                Err(_) => Err(CacheError::Internal(
                    "in-flight load finished without a result".to_string(),
                )),
            },
        }
    }

    /// The shared load body: key lock, loader retries with exponential
    /// backoff, write propagation, refresh stamp.
    async fn run_load(&self, key: &K, tx: &tokio::sync::broadcast::Sender<Result<V>>) -> Result<V> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let cancel = self.inner.shutdown.child_token();
        let max_attempts = self.inner.config.max_retries.max(1);
        let mut delay = self.inner.config.retry_base_delay;
        let mut attempt = 0;
        let started = Instant::now();

        loop {
            attempt += 1;
            match self.inner.loader.load(key, &cancel).await {
                Ok(value) => {
                    self.write_via_policy(key, value.clone()).await?;
                    self.with_state(key, |st| st.last_refresh_at = Some(Instant::now()));
                    self.inner
                        .events
                        .record_latency(CacheOp::Load, started.elapsed());
                    return Ok(value);
                }
                Err(CacheError::Cancelled) => return Err(CacheError::Cancelled),
                Err(e) if attempt < max_attempts => {
                    tracing::debug!(
                        target: "tiercache",
                        key = %key,
                        attempt,
                        error = %e,
                        "loader failed, backing off"
                    );
                    // Every waiter is gone: stop retrying on their behalf.
                    if tx.receiver_count() == 0 {
                        return Err(CacheError::Cancelled);
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(CacheError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay *= 2;
                }
                Err(e) => {
                    self.inner.events.on_load_failure(key);
                    return Err(CacheError::LoaderFailed(e.to_string()));
                }
            }
        }
    }
}
