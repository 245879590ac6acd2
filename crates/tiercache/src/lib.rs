//! tiercache: Multi-tier read-through cache for Rust
//!
//! # Features
//!
//! - **Multi-tier composition** (W-TinyLFU memory tier, basic memory tier,
//!   remote KV tier), fastest first, with hit promotion between tiers
//! - **Single-flight miss loading** with retries and exponential backoff
//! - **Pluggable write propagation** (write-through, write-behind)
//! - **Pro-active early refresh** of values nearing expiry
//! - **TTL jitter** against synchronized expiry storms
//! - **Per-key and global telemetry**
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tiercache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let loader = FnLoader::new(|key: String| async move {
//!         Ok(format!("value for {key}"))
//!     });
//!
//!     let cache = CacheManager::builder(loader)
//!         .layer(Arc::new(TinyLfuLayer::with_defaults()))
//!         .config(ManagerConfig::with_ttl(Duration::from_secs(300)))
//!         .build();
//!
//!     let value = cache.get_or_load(&"user:1".to_string(), &Default::default()).await?;
//!     println!("got: {value}");
//!
//!     cache.close().await;
//!     Ok(())
//! }
//! ```

mod instrument;
mod loader;
mod manager;
mod policy;

// Re-export core
pub use tiercache_core::*;

// Re-export storage tiers
pub use tiercache_storage::{
    CircuitBreaker, MemoryConfig, MemoryLayer, RemoteConfig, RemoteLayer, RemoteStore,
    TinyLfuConfig, TinyLfuLayer,
};

#[cfg(feature = "redis")]
pub use tiercache_storage::{RedisConfig, RedisStore};

pub use instrument::InstrumentedCache;
pub use loader::{FnLoader, FnPersistentStore, Loader, PersistentStore};
pub use manager::{CacheManager, CacheManagerBuilder, ManagerConfig, PromotionPolicy};
pub use policy::{WriteBehind, WritePolicy, WriteThrough};

// Re-export the cancellation token callers pass into reads
pub use tokio_util::sync::CancellationToken;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CacheError, CacheEvents, CacheLayer, CacheManager, CacheManagerBuilder, CancellationToken,
        FnLoader, FnPersistentStore, InstrumentedCache, Loader, ManagerConfig, MemoryConfig,
        MemoryLayer, PersistentStore, PromotionPolicy, RemoteConfig, RemoteLayer, RemoteStore,
        Result, TinyLfuConfig, TinyLfuLayer, TracingEvents, WriteBehind, WritePolicy, WriteThrough,
    };

    #[cfg(feature = "json")]
    pub use crate::JsonCodec;

    #[cfg(feature = "msgpack")]
    pub use crate::MsgPackCodec;

    #[cfg(feature = "bincode")]
    pub use crate::BincodeCodec;

    #[cfg(feature = "metrics")]
    pub use crate::MetricsEvents;

    #[cfg(feature = "redis")]
    pub use crate::{RedisConfig, RedisStore};
}

#[cfg(test)]
mod tests;
