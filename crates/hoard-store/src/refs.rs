use std::collections::HashMap;
use std::sync::Mutex;

use hoard_types::ContentHash;

/// Per-hash reference counts, shared by every store backend.
///
/// Increments are atomic with respect to each other, so the final count after
/// a run does not depend on how workers were scheduled.
#[derive(Default)]
pub struct ReferenceCounts {
    counts: Mutex<HashMap<ContentHash, u64>>,
}

impl ReferenceCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reference to `hash` and return the new count.
    pub fn increment(&self, hash: &ContentHash) -> u64 {
        let mut counts = self.counts.lock().expect("lock poisoned");
        let count = counts.entry(*hash).or_insert(0);
        *count += 1;
        *count
    }

    /// Current count for `hash` (zero if unknown).
    pub fn get(&self, hash: &ContentHash) -> u64 {
        let counts = self.counts.lock().expect("lock poisoned");
        counts.get(hash).copied().unwrap_or(0)
    }

    /// Discard all counts and tally `hashes` from scratch.
    pub fn rebuild<I: IntoIterator<Item = ContentHash>>(&self, hashes: I) {
        let mut fresh: HashMap<ContentHash, u64> = HashMap::new();
        for hash in hashes {
            *fresh.entry(hash).or_insert(0) += 1;
        }
        *self.counts.lock().expect("lock poisoned") = fresh;
    }

    /// Number of distinct hashes with at least one reference.
    pub fn len(&self) -> usize {
        self.counts.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.lock().expect("lock poisoned").values().sum()
    }
}

impl std::fmt::Debug for ReferenceCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCounts")
            .field("hashes", &self.len())
            .field("total", &self.total())
            .finish()
    }
}
