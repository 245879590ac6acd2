//! Integration tests for the cache manager

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;
use tiercache_core::LayerStats;

/// Loader with call counting, configurable latency, failure injection and a
/// mutable current value.
#[derive(Clone)]
struct TestLoader {
    calls: Arc<AtomicU32>,
    delay: Duration,
    value: Arc<Mutex<String>>,
    fail_remaining: Arc<AtomicU32>,
    concurrent: Arc<AtomicI32>,
    max_concurrent: Arc<AtomicI32>,
}

impl TestLoader {
    fn new(value: impl Into<String>) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            delay: Duration::ZERO,
            value: Arc::new(Mutex::new(value.into())),
            fail_remaining: Arc::new(AtomicU32::new(0)),
            concurrent: Arc::new(AtomicI32::new(0)),
            max_concurrent: Arc::new(AtomicI32::new(0)),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader<String, String> for TestLoader {
    async fn load(&self, _key: &String, cancel: &CancellationToken) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        let result = if self.delay > Duration::ZERO {
            tokio::select! {
                _ = cancel.cancelled() => Err(CacheError::Cancelled),
                _ = tokio::time::sleep(self.delay) => Ok(()),
            }
        } else {
            Ok(())
        };

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        result?;

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(CacheError::Internal("injected loader failure".to_string()));
        }

        Ok(self.value.lock().clone())
    }
}

/// Persistent store recording every write, with failure injection.
#[derive(Clone, Default)]
struct TestStore {
    writes: Arc<Mutex<Vec<(String, String)>>>,
    fail: Arc<AtomicU32>,
}

impl TestStore {
    fn failing() -> Self {
        let store = Self::default();
        store.fail.store(1, Ordering::SeqCst);
        store
    }

    fn write_count(&self) -> usize {
        self.writes.lock().len()
    }
}

#[async_trait]
impl PersistentStore<String, String> for TestStore {
    async fn persist(&self, key: &String, value: &String) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) > 0 {
            return Err(CacheError::Internal("store down".to_string()));
        }
        self.writes.lock().push((key.clone(), value.clone()));
        Ok(())
    }
}

/// Layer that records the TTL of every set it receives.
#[derive(Clone, Default)]
struct TtlRecordingLayer {
    ttls: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl CacheLayer<String, String> for TtlRecordingLayer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn try_get(&self, _key: &String) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &String, _value: String, ttl: Duration) -> Result<()> {
        self.ttls.lock().push(ttl);
        Ok(())
    }

    async fn remove(&self, _key: &String) -> Result<bool> {
        Ok(false)
    }

    async fn stats(&self) -> Result<LayerStats> {
        Ok(LayerStats::default())
    }
}

fn memory(name: &str) -> Arc<MemoryLayer<String, String>> {
    Arc::new(MemoryLayer::with_defaults().named(name))
}

fn no_jitter() -> ManagerConfig {
    ManagerConfig::default().no_jitter()
}

#[tokio::test]
async fn test_cold_read_populates_all_layers() {
    let l1 = memory("l1");
    let l2 = memory("l2");
    let loader = TestLoader::new("v1");

    let cache = CacheManager::builder(loader.clone())
        .layer(l1.clone())
        .layer(l2.clone())
        .config(no_jitter())
        .build();

    let key = "k".to_string();
    let value = cache.get_or_load(&key, &CancellationToken::new()).await.unwrap();
    assert_eq!(value, "v1");

    // Write-through filled both tiers synchronously.
    assert_eq!(l1.try_get(&key).await.unwrap(), Some("v1".to_string()));
    assert_eq!(l2.try_get(&key).await.unwrap(), Some("v1".to_string()));
    assert_eq!(loader.call_count(), 1);

    cache.close().await;
}

#[tokio::test]
async fn test_slow_tier_hit_promotes_to_fast_tier() {
    let l1 = memory("l1");
    let l2 = memory("l2");
    let loader = TestLoader::new("unused");

    let cache = CacheManager::builder(loader.clone())
        .layer(l1.clone())
        .layer(l2.clone())
        .config(no_jitter())
        .build();

    let key = "k".to_string();
    l2.set(&key, "v2".to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    let value = cache.get_or_load(&key, &CancellationToken::new()).await.unwrap();
    assert_eq!(value, "v2");
    assert_eq!(loader.call_count(), 0);

    // Promotion is fire-and-forget; it must land within 100 ms.
    let mut promoted = false;
    for _ in 0..20 {
        if l1.try_get(&key).await.unwrap() == Some("v2".to_string()) {
            promoted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(promoted, "hit in l2 was not promoted to l1");

    cache.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_collapses_concurrent_misses() {
    let l1 = memory("l1");
    let loader = TestLoader::new("L").with_delay(Duration::from_millis(200));

    let cache = CacheManager::builder(loader.clone())
        .layer(l1)
        .config(no_jitter())
        .build();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_load(&"k".to_string(), &CancellationToken::new())
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "L");
    }
    assert_eq!(loader.call_count(), 1);

    cache.close().await;
}

#[tokio::test]
async fn test_single_flight_shares_terminal_failure() {
    let l1 = memory("l1");
    let loader = TestLoader::new("never").with_delay(Duration::from_millis(50));
    loader.fail_next(u32::MAX);

    let config = ManagerConfig {
        max_retries: 2,
        retry_base_delay: Duration::from_millis(10),
        ..no_jitter()
    };
    let cache = CacheManager::builder(loader.clone())
        .layer(l1)
        .config(config)
        .build();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_load(&"k".to_string(), &CancellationToken::new())
                .await
        }));
    }

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, CacheError::LoaderFailed(_)), "got {err}");
    }
    // One shared load, two attempts.
    assert_eq!(loader.call_count(), 2);

    cache.close().await;
}

#[tokio::test]
async fn test_failed_load_is_retried_by_next_caller() {
    let l1 = memory("l1");
    let loader = TestLoader::new("ok");
    loader.fail_next(3); // first call exhausts its 3 attempts

    let config = ManagerConfig {
        retry_base_delay: Duration::from_millis(5),
        ..no_jitter()
    };
    let cache = CacheManager::builder(loader.clone())
        .layer(l1)
        .config(config)
        .build();

    let key = "k".to_string();
    assert!(cache.get_or_load(&key, &CancellationToken::new()).await.is_err());

    // The inflight entry was cleared, so a fresh caller loads again.
    let value = cache.get_or_load(&key, &CancellationToken::new()).await.unwrap();
    assert_eq!(value, "ok");

    cache.close().await;
}

#[tokio::test]
async fn test_cancelled_caller_does_not_cancel_shared_load() {
    let l1 = memory("l1");
    let loader = TestLoader::new("shared").with_delay(Duration::from_millis(150));

    let cache = CacheManager::builder(loader.clone())
        .layer(l1)
        .config(no_jitter())
        .build();

    let token = CancellationToken::new();
    let key = "k".to_string();

    let cancelled = {
        let cache = cache.clone();
        let key = key.clone();
        let token = token.clone();
        tokio::spawn(async move { cache.get_or_load(&key, &token).await })
    };
    let patient = {
        let cache = cache.clone();
        let key = key.clone();
        tokio::spawn(async move { cache.get_or_load(&key, &CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    assert!(matches!(
        cancelled.await.unwrap(),
        Err(CacheError::Cancelled)
    ));
    assert_eq!(patient.await.unwrap().unwrap(), "shared");
    assert_eq!(loader.call_count(), 1);

    cache.close().await;
}

#[tokio::test]
async fn test_layer_error_falls_through_to_next_layer() {
    /// Layer whose reads always fail.
    struct BrokenLayer;

    #[async_trait]
    impl CacheLayer<String, String> for BrokenLayer {
        fn name(&self) -> &str {
            "broken"
        }
        async fn try_get(&self, _key: &String) -> Result<Option<String>> {
            Err(CacheError::LayerUnavailable("broken".to_string()))
        }
        async fn set(&self, _key: &String, _value: String, _ttl: Duration) -> Result<()> {
            Err(CacheError::LayerUnavailable("broken".to_string()))
        }
        async fn remove(&self, _key: &String) -> Result<bool> {
            Err(CacheError::LayerUnavailable("broken".to_string()))
        }
        async fn stats(&self) -> Result<LayerStats> {
            Ok(LayerStats::default())
        }
    }

    let l2 = memory("l2");
    let loader = TestLoader::new("unused");

    let cache = CacheManager::builder(loader)
        .layer(Arc::new(BrokenLayer))
        .layer(l2.clone())
        .config(no_jitter())
        .build();

    let key = "k".to_string();
    l2.set(&key, "v".to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    let value = cache.get_or_load(&key, &CancellationToken::new()).await.unwrap();
    assert_eq!(value, "v");

    cache.close().await;
}

#[tokio::test]
async fn test_early_refresh_inside_soft_window() {
    let l1 = memory("l1");
    let loader = TestLoader::new("v1");

    let config = ManagerConfig {
        default_ttl: Duration::from_millis(200),
        early_refresh_threshold: Duration::from_millis(150),
        min_refresh_interval: Duration::ZERO,
        ..no_jitter()
    };
    let cache = CacheManager::builder(loader.clone())
        .layer(l1.clone())
        .config(config)
        .build();

    let key = "k".to_string();
    cache.insert(&key, "v0".to_string()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    let value = cache.get_or_load(&key, &CancellationToken::new()).await.unwrap();
    assert_eq!(value, "v0");

    // The refresh fires after a 0-500 ms jitter; poll for its result.
    let mut refreshed = false;
    for _ in 0..100 {
        if l1.try_get(&key).await.unwrap() == Some("v1".to_string()) {
            refreshed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refreshed, "early refresh never replaced the value");

    let snapshot = cache.snapshot(10);
    assert!(snapshot.key(&key).unwrap().early_refreshes >= 1);
    assert!(cache.global_early_refresh_count() >= 1);

    cache.close().await;
}

#[tokio::test]
async fn test_no_refresh_outside_soft_window() {
    let l1 = memory("l1");
    let loader = TestLoader::new("v1");

    let config = ManagerConfig {
        default_ttl: Duration::from_secs(300),
        early_refresh_threshold: Duration::from_secs(60),
        min_refresh_interval: Duration::ZERO,
        ..no_jitter()
    };
    let cache = CacheManager::builder(loader.clone())
        .layer(l1)
        .config(config)
        .build();

    let key = "k".to_string();
    cache.insert(&key, "v0".to_string()).await.unwrap();
    cache.get_or_load(&key, &CancellationToken::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.global_early_refresh_count(), 0);
    assert_eq!(loader.call_count(), 0);

    cache.close().await;
}

#[tokio::test]
async fn test_refresh_throttled_by_min_interval() {
    let l1 = memory("l1");
    let loader = TestLoader::new("v1");

    let config = ManagerConfig {
        default_ttl: Duration::from_millis(100),
        early_refresh_threshold: Duration::from_millis(100),
        min_refresh_interval: Duration::from_millis(400),
        layer_ttls: vec![Duration::from_secs(60)],
        ..no_jitter()
    };
    let cache = CacheManager::builder(loader.clone())
        .layer(l1)
        .config(config)
        .build();

    let key = "k".to_string();
    cache.insert(&key, "v0".to_string()).await.unwrap();

    // Hammer the key for ~1.2 s; the throttle allows at most
    // ceil(1200 / 400) + 1 successful refreshes.
    for _ in 0..60 {
        cache.get_or_load(&key, &CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let refreshes = cache.global_early_refresh_count();
    assert!(refreshes <= 4, "throttle allowed {refreshes} refreshes");

    cache.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_refresh_concurrency_cap() {
    let l1 = memory("l1");
    let loader = TestLoader::new("v").with_delay(Duration::from_millis(100));

    let config = ManagerConfig {
        default_ttl: Duration::from_millis(50),
        early_refresh_threshold: Duration::from_millis(50),
        min_refresh_interval: Duration::ZERO,
        max_concurrent_early_refreshes: 2,
        layer_ttls: vec![Duration::from_secs(60)],
        ..no_jitter()
    };
    let cache = CacheManager::builder(loader.clone())
        .layer(l1)
        .config(config)
        .build();

    for i in 0..20 {
        cache.insert(&format!("k{i}"), "v".to_string()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(60)).await;

    // Every key is inside its soft window; hitting them all competes for
    // the two refresh slots.
    for i in 0..20 {
        cache
            .get_or_load(&format!("k{i}"), &CancellationToken::new())
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(800)).await;

    let peak = loader.max_concurrent.load(Ordering::SeqCst);
    assert!(peak <= 2, "observed {peak} concurrent refresh loads");

    cache.close().await;
}

#[tokio::test]
async fn test_ttl_jitter_bounds() {
    let recording = TtlRecordingLayer::default();
    let loader = TestLoader::new("v");

    let base = Duration::from_secs(100);
    let config = ManagerConfig {
        default_ttl: base,
        ttl_jitter_fraction: 0.1,
        ..ManagerConfig::default()
    };
    let cache = CacheManager::builder(loader)
        .layer(Arc::new(recording.clone()))
        .config(config)
        .build();

    for i in 0..100 {
        cache.insert(&format!("k{i}"), "v".to_string()).await.unwrap();
    }

    let ttls = recording.ttls.lock().clone();
    assert_eq!(ttls.len(), 100);
    let lo = base.mul_f64(0.9);
    let hi = base.mul_f64(1.1);
    for ttl in &ttls {
        assert!(*ttl >= lo && *ttl <= hi, "ttl {ttl:?} outside jitter bounds");
    }
    // With jitter on, TTLs must actually vary.
    assert!(ttls.iter().any(|t| *t != ttls[0]));

    cache.close().await;
}

#[tokio::test]
async fn test_write_through_persistence_failure_is_fatal() {
    let l1 = memory("l1");
    let l2 = memory("l2");
    let loader = TestLoader::new("unused");
    let store = TestStore::failing();

    let cache = CacheManager::builder(loader)
        .layer(l1.clone())
        .layer(l2.clone())
        .persistent_store(store)
        .config(no_jitter())
        .build();

    let key = "k".to_string();
    let err = cache.insert(&key, "v".to_string()).await.unwrap_err();
    assert!(matches!(err, CacheError::PersistenceFailed(_)));

    // Layer writes preceded the fatal store failure.
    assert_eq!(l1.try_get(&key).await.unwrap(), Some("v".to_string()));
    assert_eq!(l2.try_get(&key).await.unwrap(), Some("v".to_string()));

    cache.close().await;
}

#[tokio::test]
async fn test_write_through_persists_loads_and_inserts() {
    let l1 = memory("l1");
    let loader = TestLoader::new("loaded");
    let store = TestStore::default();

    let cache = CacheManager::builder(loader)
        .layer(l1)
        .persistent_store(store.clone())
        .config(no_jitter())
        .build();

    cache.insert(&"a".to_string(), "v".to_string()).await.unwrap();
    cache
        .get_or_load(&"b".to_string(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(store.write_count(), 2);

    cache.close().await;
}

#[tokio::test]
async fn test_write_behind_is_asynchronous_and_survives_store_failure() {
    let l1 = memory("l1");
    let l2 = memory("l2");
    let loader = TestLoader::new("unused");
    let store = TestStore::failing();

    let cache = CacheManager::builder(loader)
        .layer(l1.clone())
        .layer(l2.clone())
        .write_policy(WriteBehind::new(Duration::from_secs(60)))
        .persistent_store(store)
        .config(no_jitter())
        .build();

    let key = "k".to_string();
    // The synchronous path only touches the fastest layer and never fails
    // on store problems.
    cache.insert(&key, "v".to_string()).await.unwrap();
    assert_eq!(l1.try_get(&key).await.unwrap(), Some("v".to_string()));

    // The fan-out fills the slower tier in the background.
    let mut propagated = false;
    for _ in 0..40 {
        if l2.try_get(&key).await.unwrap() == Some("v".to_string()) {
            propagated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(propagated, "write-behind fan-out never reached l2");

    cache.close().await;
}

#[tokio::test]
async fn test_invalidate_clears_layers_and_state() {
    let l1 = memory("l1");
    let l2 = memory("l2");
    let loader = TestLoader::new("reloaded");

    let cache = CacheManager::builder(loader.clone())
        .layer(l1.clone())
        .layer(l2.clone())
        .config(no_jitter())
        .build();

    let key = "k".to_string();
    cache.insert(&key, "v".to_string()).await.unwrap();

    assert!(cache.invalidate(&key).await.unwrap());
    assert_eq!(l1.try_get(&key).await.unwrap(), None);
    assert_eq!(l2.try_get(&key).await.unwrap(), None);

    let value = cache.get_or_load(&key, &CancellationToken::new()).await.unwrap();
    assert_eq!(value, "reloaded");
    assert_eq!(loader.call_count(), 1);

    cache.close().await;
}

#[tokio::test]
async fn test_stale_key_state_is_collected() {
    let l1 = memory("l1");
    let loader = TestLoader::new("v");

    let config = ManagerConfig {
        stale_key_cleanup_interval: Duration::from_millis(50),
        stale_key_threshold: Duration::from_millis(100),
        ..no_jitter()
    };
    let cache = CacheManager::builder(loader)
        .layer(l1.clone())
        .config(config)
        .build();

    let key = "k".to_string();
    cache.insert(&key, "v".to_string()).await.unwrap();
    assert!(cache.snapshot(10).key(&key).is_some());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        cache.snapshot(10).key(&key).is_none(),
        "stale per-key state survived cleanup"
    );
    // The layer itself keeps the value until TTL expiry.
    assert_eq!(l1.try_get(&key).await.unwrap(), Some("v".to_string()));

    cache.close().await;
}

#[tokio::test]
async fn test_snapshot_counters_and_top_keys() {
    let l1 = memory("l1");
    let loader = TestLoader::new("v");

    let cache = CacheManager::builder(loader)
        .layer(l1)
        .config(no_jitter())
        .build();

    let hot = "hot".to_string();
    let cold = "cold".to_string();
    cache.insert(&hot, "v".to_string()).await.unwrap();
    cache.insert(&cold, "v".to_string()).await.unwrap();

    for _ in 0..5 {
        cache.get_or_load(&hot, &CancellationToken::new()).await.unwrap();
    }
    cache.get_or_load(&cold, &CancellationToken::new()).await.unwrap();
    cache
        .get_or_load(&"missing".to_string(), &CancellationToken::new())
        .await
        .unwrap();

    let snapshot = cache.snapshot(1);
    assert_eq!(snapshot.key(&hot).unwrap().hits, 5);
    assert_eq!(snapshot.key(&cold).unwrap().hits, 1);
    assert_eq!(snapshot.total_hits, 6);
    assert_eq!(snapshot.total_misses, 1);
    assert_eq!(snapshot.top_keys, vec![(hot.clone(), 5)]);
    assert!(snapshot.key(&hot).unwrap().last_refresh_at.is_some());

    cache.close().await;
}

#[tokio::test]
async fn test_instrumented_cache_records_latency() {
    let l1 = memory("l1");
    let loader = TestLoader::new("v");

    let cache = CacheManager::builder(loader)
        .layer(l1)
        .config(no_jitter())
        .build();
    let instrumented = InstrumentedCache::new(cache, TracingEvents::new());

    let key = "k".to_string();
    instrumented.insert(&key, "v".to_string()).await.unwrap();
    let value = instrumented
        .get_or_load(&key, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(value, "v");

    let snapshot = instrumented.snapshot(10);
    assert!(snapshot.key(&key).unwrap().last_latency_ms.is_some());

    instrumented.close().await;
}

#[tokio::test]
async fn test_promotion_policy_none_leaves_fast_tier_empty() {
    let l1 = memory("l1");
    let l2 = memory("l2");
    let loader = TestLoader::new("unused");

    let config = ManagerConfig {
        promotion_policy: PromotionPolicy::None,
        ..no_jitter()
    };
    let cache = CacheManager::builder(loader)
        .layer(l1.clone())
        .layer(l2.clone())
        .config(config)
        .build();

    let key = "k".to_string();
    l2.set(&key, "v".to_string(), Duration::from_secs(60))
        .await
        .unwrap();

    cache.get_or_load(&key, &CancellationToken::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(l1.try_get(&key).await.unwrap(), None);

    cache.close().await;
}

#[tokio::test]
async fn test_missing_store_can_be_required() {
    let l1 = memory("l1");
    let loader = TestLoader::new("v");

    let config = ManagerConfig {
        require_persistent_store: true,
        ..no_jitter()
    };
    let cache = CacheManager::builder(loader)
        .layer(l1)
        .config(config)
        .build();

    let err = cache.insert(&"k".to_string(), "v".to_string()).await.unwrap_err();
    assert!(matches!(err, CacheError::PersistenceFailed(_)));

    cache.close().await;
}
