//! Redis-backed remote store

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;

use tiercache_core::{CacheError, Result};

use super::store::RemoteStore;

/// Connection settings for [`RedisStore`]
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,

    /// Connection pool size
    pub pool_size: u32,

    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create new config with URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set pool size
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }
}

/// [`RemoteStore`] implementation over a pooled Redis connection.
///
/// TTLs are applied with millisecond precision (`SET ... PX`).
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
}

impl RedisStore {
    /// Connect to Redis and build the pool.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.url.as_str())
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))
    }
}

fn map_redis_err(e: redis::RedisError) -> CacheError {
    if e.is_timeout() {
        CacheError::Timeout
    } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        CacheError::Connection(e.to_string())
    } else {
        CacheError::LayerTransient(e.to_string())
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        conn.get(key).await.map_err(map_redis_err)
    }

    async fn set_bytes(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(bytes)
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(map_redis_err)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let deleted: u64 = conn.del(key).await.map_err(map_redis_err)?;
        Ok(deleted > 0)
    }
}
