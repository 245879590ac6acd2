//! Memory tier in front of a Redis tier.
//!
//! Requires a local Redis:
//!   docker run -p 6379:6379 redis
//!   cargo run --example redis_tier --features redis

use std::sync::Arc;
use std::time::Duration;

use tiercache::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let loader = FnLoader::new(|key: String| async move { Ok(format!("loaded:{key}")) });

    let redis = RedisStore::connect(RedisConfig::new("redis://127.0.0.1:6379")).await?;
    let remote: RemoteLayer<String, String, JsonCodec, RedisStore> =
        RemoteLayer::new(redis, JsonCodec, RemoteConfig::default().prefix("demo"));

    let cache = CacheManager::builder(loader)
        .layer(Arc::new(TinyLfuLayer::with_defaults()))
        .layer(Arc::new(remote))
        .config(ManagerConfig::with_ttl(Duration::from_secs(300)))
        .build();

    let key = "article:1".to_string();
    let value = cache.get_or_load(&key, &CancellationToken::new()).await?;
    println!("first read: {value}");

    // Subsequent reads hit the memory tier; after a restart they would hit
    // Redis and repopulate memory via promotion.
    let value = cache.get_or_load(&key, &CancellationToken::new()).await?;
    println!("second read: {value}");

    cache.close().await;
    Ok(())
}
