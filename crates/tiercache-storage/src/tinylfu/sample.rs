//! Random-access key index for sampled eviction

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;
use rand::Rng;

struct Inner<K> {
    keys: Vec<K>,
    positions: HashMap<K, usize>,
}

/// A set of keys supporting O(1) insert/remove and uniform sampling whose
/// cost depends only on the sample size, not on the set size.
///
/// Eviction needs a handful of uniformly random resident keys; a concurrent
/// map cannot produce those without scanning, so the tier maintains this
/// side index (vector + position map, swap-remove on delete).
pub struct SampleSet<K> {
    inner: RwLock<Inner<K>>,
}

impl<K> SampleSet<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                keys: Vec::new(),
                positions: HashMap::new(),
            }),
        }
    }

    /// Add a key; a no-op if already present.
    pub fn insert(&self, key: K) {
        let mut inner = self.inner.write();
        if inner.positions.contains_key(&key) {
            return;
        }
        let idx = inner.keys.len();
        inner.keys.push(key.clone());
        inner.positions.insert(key, idx);
    }

    /// Remove a key. Returns `true` if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.write();
        let Some(idx) = inner.positions.remove(key) else {
            return false;
        };
        inner.keys.swap_remove(idx);
        if idx < inner.keys.len() {
            let moved = inner.keys[idx].clone();
            inner.positions.insert(moved, idx);
        }
        true
    }

    /// Up to `n` distinct keys picked uniformly at random.
    ///
    /// Returns every key when fewer than `n` are present.
    pub fn sample(&self, n: usize) -> Vec<K> {
        let inner = self.inner.read();
        let len = inner.keys.len();
        if len <= n {
            return inner.keys.clone();
        }

        let mut rng = rand::rng();
        let mut picked = Vec::with_capacity(n);
        let mut seen = std::collections::HashSet::with_capacity(n);
        while picked.len() < n {
            let idx = rng.random_range(0..len);
            if seen.insert(idx) {
                picked.push(inner.keys[idx].clone());
            }
        }
        picked
    }

    pub fn len(&self) -> usize {
        self.inner.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().keys.is_empty()
    }
}

impl<K> Default for SampleSet<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
