//! Hash mixing shared by the probabilistic structures
//!
//! The sketch and the Bloom filter both need several independent hash
//! functions per key. Each structure derives a seed stream with
//! [`derive_seeds`] and folds the key's base hash through the splitmix64
//! finalizer once per seed, so one key hash yields as many independent
//! probe positions as needed.

use std::hash::{Hash, Hasher};

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    mix(*state, 0)
}

/// Generate `n` seeds from a base constant.
pub(crate) fn derive_seeds(base: u64, n: usize) -> Vec<u64> {
    let mut state = base;
    (0..n).map(|_| splitmix64(&mut state)).collect()
}

/// Fold a key hash with a seed through the splitmix64 finalizer.
pub(crate) fn mix(hash: u64, seed: u64) -> u64 {
    let mut x = hash ^ seed;
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Base hash of a key, computed once per operation.
pub(crate) fn key_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
