//! Error types for cache operations

use thiserror::Error;

/// Main error type for all cache operations
///
/// `Clone` is required so a single load result can be fanned out to every
/// waiter of a coalesced request.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// A layer failed in a way that is worth retrying (timeout, reset)
    #[error("transient layer error: {0}")]
    LayerTransient(String),

    /// A layer is unavailable (circuit open, retries exhausted)
    #[error("layer unavailable: {0}")]
    LayerUnavailable(String),

    /// The loader failed after exhausting retries
    #[error("loader failed: {0}")]
    LoaderFailed(String),

    /// The persistent store rejected a write
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// Value encoding or decoding failed
    #[error("codec error: {0}")]
    Codec(String),

    /// Connecting to a remote store failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Whether a remote-layer retry is worthwhile for this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CacheError::LayerTransient(_) | CacheError::Connection(_) | CacheError::Timeout
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
