//! Pluggable value codec for byte-oriented tiers

use crate::CacheError;

/// Encodes and decodes values for tiers that store bytes (the remote layer).
///
/// The codec is injected at layer construction; the core never assumes a
/// serialization format. Built-in implementations: JSON, MessagePack,
/// Bincode.
pub trait ValueCodec<V>: Send + Sync + 'static {
    /// Name of the codec (for debugging/metrics)
    fn name(&self) -> &str;

    /// Encode a value to bytes
    fn encode(&self, value: &V) -> Result<Vec<u8>, CacheError>;

    /// Decode bytes to a value
    fn decode(&self, bytes: &[u8]) -> Result<V, CacheError>;
}

/// JSON codec (default)
///
/// Human-readable, widely compatible, good for debugging.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl<V> ValueCodec<V> for JsonCodec
where
    V: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(value).map_err(|e| CacheError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Codec(e.to_string()))
    }
}

/// MessagePack codec (optional)
///
/// Faster and more compact than JSON, but not human-readable.
/// Enable with the `msgpack` feature.
#[cfg(feature = "msgpack")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

#[cfg(feature = "msgpack")]
impl<V> ValueCodec<V> for MsgPackCodec
where
    V: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "msgpack"
    }

    fn encode(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        rmp_serde::to_vec(value).map_err(|e| CacheError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CacheError> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::Codec(e.to_string()))
    }
}

/// Bincode codec (optional)
///
/// Fastest and most compact, but not human-readable or cross-language.
/// Enable with the `bincode` feature.
#[cfg(feature = "bincode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

#[cfg(feature = "bincode")]
impl<V> ValueCodec<V> for BincodeCodec
where
    V: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "bincode"
    }

    fn encode(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| CacheError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V, CacheError> {
        let (val, _len) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CacheError::Codec(e.to_string()))?;
        Ok(val)
    }
}
