//! Count-Min sketch for approximate frequency tracking

use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use super::hash::{derive_seeds, key_hash, mix};

// Seed-stream base for the per-row hashes.
const SEED_BASE: u64 = 0x9e37_79b9_7f4a_7c15;

/// A `depth x width` matrix of counters with one-sided error.
///
/// `estimate` never under-reports the true increment count of a key (absent
/// decay): each row over-counts through hash collisions and the minimum over
/// rows is taken.
///
/// Increments are concurrent per-cell atomic adds; `decay` takes the
/// exclusive side of the gate so it sees a consistent matrix while halving.
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    seeds: Vec<u64>,
    cells: Vec<AtomicU32>,
    gate: RwLock<()>,
}

impl CountMinSketch {
    /// Create a sketch with the given dimensions.
    pub fn new(width: usize, depth: usize) -> Self {
        let width = width.max(1);
        let depth = depth.max(1);

        let seeds = derive_seeds(SEED_BASE, depth);
        let cells = (0..width * depth).map(|_| AtomicU32::new(0)).collect();

        Self {
            width,
            depth,
            seeds,
            cells,
            gate: RwLock::new(()),
        }
    }

    /// Add 1 to one cell per row for `key`, saturating at `u32::MAX`.
    pub fn increment<K: Hash + ?Sized>(&self, key: &K) {
        let _shared = self.gate.read();
        let hash = key_hash(key);
        for row in 0..self.depth {
            let cell = &self.cells[self.cell_index(hash, row)];
            let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                c.checked_add(1)
            });
        }
    }

    /// The minimum counter over all rows for `key`.
    pub fn estimate<K: Hash + ?Sized>(&self, key: &K) -> u32 {
        let hash = key_hash(key);
        let mut min = u32::MAX;
        for row in 0..self.depth {
            let count = self.cells[self.cell_index(hash, row)].load(Ordering::Relaxed);
            min = min.min(count);
        }
        min
    }

    /// Halve every cell so recency dominates long-run frequency.
    pub fn decay(&self) {
        let _exclusive = self.gate.write();
        for cell in &self.cells {
            let halved = cell.load(Ordering::Relaxed) >> 1;
            cell.store(halved, Ordering::Relaxed);
        }
    }

    /// Sketch width (counters per row).
    pub fn width(&self) -> usize {
        self.width
    }

    /// Sketch depth (number of rows).
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn cell_index(&self, hash: u64, row: usize) -> usize {
        row * self.width + (mix(hash, self.seeds[row]) % self.width as u64) as usize
    }
}
