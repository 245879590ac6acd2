//! Core traits for cache operations

mod codec;
mod events;
mod layer;

pub use codec::ValueCodec;
pub use events::{CacheEvents, CacheOp, NoopEvents, TracingEvents};
pub use layer::{CacheKey, CacheLayer, CacheValue};

#[cfg(feature = "json")]
pub use codec::JsonCodec;

#[cfg(feature = "msgpack")]
pub use codec::MsgPackCodec;

#[cfg(feature = "bincode")]
pub use codec::BincodeCodec;

#[cfg(feature = "metrics")]
pub use events::MetricsEvents;
