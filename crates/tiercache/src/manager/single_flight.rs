//! Per-key request coalescing

use dashmap::DashMap;
use tokio::sync::broadcast;

use tiercache_core::{CacheKey, CacheValue, Result};

/// The caller's role in a coalesced load.
pub(crate) enum Flight<V> {
    /// This caller must run the load and broadcast the outcome.
    Leader(broadcast::Sender<Result<V>>),
    /// A load is already running; await its broadcast.
    Follower(broadcast::Receiver<Result<V>>),
}

/// Collapses concurrent misses on the same key into one load.
///
/// The first caller for a key becomes the leader and installs a broadcast
/// channel; everyone arriving before completion subscribes to it. The
/// leader removes the entry before broadcasting, so a caller arriving after
/// completion starts a fresh flight.
pub(crate) struct SingleFlight<K, V> {
    inflight: DashMap<K, broadcast::Sender<Result<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Atomically join an in-flight load or become the leader.
    pub fn join_or_lead(&self, key: &K) -> Flight<V> {
        match self.inflight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Flight::Follower(entry.get().subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                Flight::Leader(tx)
            }
        }
    }

    /// Publish the outcome and clear the entry.
    ///
    /// Must run on every load outcome, or the key would coalesce forever.
    pub fn complete(&self, key: &K, tx: &broadcast::Sender<Result<V>>, result: Result<V>) {
        self.inflight.remove(key);
        if tx.receiver_count() > 0 {
            let _ = tx.send(result);
        }
    }

    /// Drop a flight entry without broadcasting (stale-state cleanup).
    pub fn remove(&self, key: &K) {
        self.inflight.remove(key);
    }

    /// Keys with a load in flight right now.
    pub fn inflight_keys(&self) -> Vec<K> {
        self.inflight.iter().map(|e| e.key().clone()).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inflight.len()
    }
}
