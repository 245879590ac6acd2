//! Remote KV tier
//!
//! Implements the layer contract over a network key/value store. All I/O is
//! wrapped in bounded retries and a circuit breaker; values cross the wire
//! through an injected codec and keys through their string form.

mod circuit_breaker;
mod config;
mod layer;
mod store;

pub use circuit_breaker::CircuitBreaker;
pub use config::RemoteConfig;
pub use layer::RemoteLayer;
pub use store::RemoteStore;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisStore};
