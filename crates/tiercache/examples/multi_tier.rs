//! Two memory tiers with promotion, write-behind propagation and
//! instrumentation.
//!
//! Run with: cargo run --example multi_tier

use std::sync::Arc;
use std::time::Duration;

use tiercache::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let loader = FnLoader::new(|key: String| async move { Ok(format!("loaded:{key}")) });

    let store = FnPersistentStore::new(|key: String, value: String| async move {
        println!("persisted {key} = {value}");
        Ok(())
    });

    // Fastest first: a small admission-gated tier in front of a larger
    // plain one.
    let l1 = Arc::new(TinyLfuLayer::<String, String>::new(TinyLfuConfig::with_max_size(100)));
    let l2 = Arc::new(MemoryLayer::<String, String>::with_defaults().named("l2"));

    let manager = CacheManager::builder(loader)
        .layer(l1)
        .layer(l2.clone())
        .write_policy(WriteBehind::new(Duration::from_secs(120)))
        .persistent_store(store)
        .events(TracingEvents::new())
        .config(ManagerConfig {
            layer_ttls: vec![Duration::from_secs(60), Duration::from_secs(300)],
            ..ManagerConfig::with_ttl(Duration::from_secs(120))
        })
        .build();
    let cache = InstrumentedCache::new(manager, TracingEvents::new());

    // Seed the slower tier only and watch the hit get promoted.
    l2.set(&"session:7".to_string(), "cached-session".to_string(), Duration::from_secs(300))
        .await?;
    let value = cache
        .get_or_load(&"session:7".to_string(), &CancellationToken::new())
        .await?;
    println!("read from l2: {value}");

    cache.insert(&"session:8".to_string(), "fresh".to_string()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = cache.snapshot(5);
    for (key, metrics) in &snapshot.keys {
        println!(
            "{key}: hits={} promotions={} last_latency={:?}ms",
            metrics.hits, metrics.promotions, metrics.last_latency_ms
        );
    }

    cache.close().await;
    Ok(())
}
