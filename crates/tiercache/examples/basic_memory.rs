//! Basic read-through caching over a single in-memory tier.
//!
//! Run with: cargo run --example basic_memory

use std::sync::Arc;
use std::time::Duration;

use tiercache::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let loader = FnLoader::new(|key: String| async move {
        // Stand-in for a database read.
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(format!("value for {key}"))
    });

    let cache = CacheManager::builder(loader)
        .layer(Arc::new(TinyLfuLayer::with_defaults()))
        .config(ManagerConfig::with_ttl(Duration::from_secs(60)))
        .build();

    let key = "user:42".to_string();

    // First read misses and invokes the loader.
    let start = std::time::Instant::now();
    let value = cache.get_or_load(&key, &CancellationToken::new()).await?;
    println!("cold read: {value} ({:?})", start.elapsed());

    // Second read hits the memory tier.
    let start = std::time::Instant::now();
    let value = cache.get_or_load(&key, &CancellationToken::new()).await?;
    println!("warm read: {value} ({:?})", start.elapsed());

    let snapshot = cache.snapshot(5);
    println!(
        "hits={} misses={} hit_ratio={:.2}",
        snapshot.total_hits,
        snapshot.total_misses,
        snapshot.hit_ratio()
    );

    cache.close().await;
    Ok(())
}
