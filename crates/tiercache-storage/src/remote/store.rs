//! Byte-level contract for network key/value stores

use std::time::Duration;

use async_trait::async_trait;

use tiercache_core::Result;

/// The operations the remote tier needs from a network KV store.
///
/// Keys arrive already stringified; values are opaque bytes produced by the
/// tier's codec. Implementations report transport problems as
/// [`CacheError::Connection`](tiercache_core::CacheError::Connection) or
/// [`CacheError::Timeout`](tiercache_core::CacheError::Timeout) so the
/// retry wrapper can classify them as transient.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch the bytes stored under `key`, if any.
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key` for at most `ttl`.
    async fn set_bytes(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Delete `key`. Returns `true` if it existed.
    async fn remove(&self, key: &str) -> Result<bool>;
}
