//! Read-only telemetry snapshot

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

/// Per-key counters captured by a snapshot.
#[derive(Debug, Clone, Default)]
pub struct KeyMetrics {
    /// Lookups that found the key in some layer
    pub hits: u64,
    /// Lookups that missed every layer
    pub misses: u64,
    /// Successful promotion writes into faster layers
    pub promotions: u64,
    /// Completed early refreshes
    pub early_refreshes: u64,
    /// When the value was last produced by the loader or an explicit write
    pub last_refresh_at: Option<Instant>,
    /// Latency of the most recent instrumented operation, in milliseconds
    pub last_latency_ms: Option<f64>,
}

/// An immutable view of manager telemetry.
///
/// Built by iterating the per-key maps once; no global lock is held.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot<K> {
    /// Per-key counters
    pub keys: HashMap<K, KeyMetrics>,
    /// Keys with a miss-load in flight at snapshot time
    pub inflight: Vec<K>,
    /// Total hits across all keys
    pub total_hits: u64,
    /// Total misses across all keys
    pub total_misses: u64,
    /// Total promotions across all keys
    pub total_promotions: u64,
    /// Total early refreshes across all keys
    pub total_early_refreshes: u64,
    /// The `top_n` keys by access count, most accessed first
    pub top_keys: Vec<(K, u64)>,
}

impl<K> MetricsSnapshot<K>
where
    K: Eq + Hash,
{
    /// Counters for one key, if it was live at snapshot time.
    pub fn key(&self, key: &K) -> Option<&KeyMetrics> {
        self.keys.get(key)
    }

    /// Overall hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total_hits + self.total_misses;
        if total == 0 {
            0.0
        } else {
            self.total_hits as f64 / total as f64
        }
    }
}
