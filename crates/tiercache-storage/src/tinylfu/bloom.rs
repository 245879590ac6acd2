//! Bloom filter for cold-key detection
//!
//! Used by the admission policy to tell first-seen keys from keys that have
//! been written before. False positives are possible (a genuinely cold key
//! may look warm and skip the admission gate), false negatives are not.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use super::hash::{derive_seeds, key_hash, mix};

// Seed-stream base for the probe hashes; distinct from the sketch's so the
// two structures never probe in lockstep.
const SEED_BASE: u64 = 0x6b2e_4cf1_8d5a_93c7;

/// A thread-safe Bloom filter over atomic 64-bit words.
///
/// Each key sets one bit per probe seed; a key is reported as seen only if
/// every probed bit is set. Writes race benignly: the worst outcome is a
/// spurious "seen".
pub struct BloomFilter {
    words: Box<[AtomicU64]>,
    seeds: Vec<u64>,
    num_bits: usize,
}

impl BloomFilter {
    /// Create a filter with at least `num_bits` bits (rounded up to whole
    /// words) and `num_hashes` probes per key.
    pub fn with_size(num_bits: usize, num_hashes: usize) -> Self {
        let num_words = num_bits.div_ceil(64).max(1);
        let words: Box<[AtomicU64]> = (0..num_words)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            words,
            seeds: derive_seeds(SEED_BASE, num_hashes.clamp(1, 16)),
            num_bits: num_words * 64,
        }
    }

    /// Mark a key as seen.
    pub fn add<K: Hash + ?Sized>(&self, key: &K) {
        let hash = key_hash(key);
        for &seed in &self.seeds {
            let bit = self.probe(hash, seed);
            self.words[bit / 64].fetch_or(1 << (bit % 64), Ordering::Relaxed);
        }
    }

    /// Whether a key might have been seen.
    ///
    /// Returns `false` only if the key was definitely never added.
    pub fn contains<K: Hash + ?Sized>(&self, key: &K) -> bool {
        let hash = key_hash(key);
        for &seed in &self.seeds {
            let bit = self.probe(hash, seed);
            if self.words[bit / 64].load(Ordering::Relaxed) & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }

    /// Reset the filter.
    pub fn clear(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Number of bits in the filter.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Number of hash probes per key.
    pub fn num_hashes(&self) -> usize {
        self.seeds.len()
    }

    fn probe(&self, hash: u64, seed: u64) -> usize {
        (mix(hash, seed) % self.num_bits as u64) as usize
    }
}
