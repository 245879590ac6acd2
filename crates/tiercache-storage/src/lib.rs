//! tiercache-storage: Storage tiers for the tiercache library
//!
//! Provides the concrete [`CacheLayer`](tiercache_core::CacheLayer)
//! implementations: a basic in-memory tier, a W-TinyLFU in-memory tier with
//! frequency-based admission, and a remote KV tier with retry and a circuit
//! breaker.

pub mod memory;
pub mod remote;
pub mod tinylfu;

pub use memory::{MemoryConfig, MemoryLayer};
pub use remote::{CircuitBreaker, RemoteConfig, RemoteLayer, RemoteStore};
pub use tinylfu::{TinyLfuConfig, TinyLfuLayer};

#[cfg(feature = "redis")]
pub use remote::{RedisConfig, RedisStore};
