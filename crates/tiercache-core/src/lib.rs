//! tiercache-core: Core traits and types for the tiercache library
//!
//! This crate provides the foundational types and traits used throughout
//! the tiercache ecosystem: the layer contract, value codecs, the event
//! sink, and the shared error and telemetry types.

mod error;
mod traits;
mod types;

pub use error::{CacheError, Result};
pub use traits::*;
pub use types::*;
