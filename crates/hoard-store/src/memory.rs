use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Read;
use std::sync::RwLock;

use hoard_types::ContentHash;

use crate::error::{StoreError, StoreResult};
use crate::refs::ReferenceCounts;
use crate::traits::{ContentStore, StoreOutcome};

/// In-memory, HashMap-based content store.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock`; the
/// write lock doubles as the per-hash claim, so concurrent stores of the same
/// content produce exactly one `Written`.
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<ContentHash, Vec<u8>>>,
    refs: ReferenceCounts,
}

impl InMemoryContentStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            refs: ReferenceCounts::new(),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }

    /// Copy of the blob stored under `hash`.
    pub fn read(&self, hash: &ContentHash) -> Option<Vec<u8>> {
        self.blobs.read().expect("lock poisoned").get(hash).cloned()
    }

    /// Return a sorted list of all stored hashes.
    pub fn all_hashes(&self) -> Vec<ContentHash> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut hashes: Vec<ContentHash> = map.keys().copied().collect();
        hashes.sort();
        hashes
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryContentStore {
    fn exists(&self, hash: &ContentHash) -> StoreResult<bool> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.contains_key(hash))
    }

    fn store(&self, hash: &ContentHash, content: &mut dyn Read) -> StoreResult<StoreOutcome> {
        if self.exists(hash)? {
            return Ok(StoreOutcome::AlreadyPresent);
        }

        let mut data = Vec::new();
        content.read_to_end(&mut data)?;
        let computed = ContentHash::of(&data);
        if computed != *hash {
            return Err(StoreError::HashMismatch {
                expected: *hash,
                computed,
            });
        }

        let mut map = self.blobs.write().expect("lock poisoned");
        match map.entry(*hash) {
            Entry::Occupied(_) => Ok(StoreOutcome::AlreadyPresent),
            Entry::Vacant(slot) => {
                slot.insert(data);
                self.refs.increment(hash);
                Ok(StoreOutcome::Written)
            }
        }
    }

    fn blob_count(&self) -> StoreResult<usize> {
        Ok(self.len())
    }

    fn references(&self) -> &ReferenceCounts {
        &self.refs
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("blob_count", &self.len())
            .field("refs", &self.refs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn put(store: &InMemoryContentStore, data: &[u8]) -> StoreOutcome {
        store.store(&ContentHash::of(data), &mut &data[..]).unwrap()
    }

    // -----------------------------------------------------------------------
    // Store / exists
    // -----------------------------------------------------------------------

    #[test]
    fn store_then_exists() {
        let store = InMemoryContentStore::new();
        let hash = ContentHash::of(b"hello world");
        assert!(!store.exists(&hash).unwrap());

        assert_eq!(put(&store, b"hello world"), StoreOutcome::Written);
        assert!(store.exists(&hash).unwrap());
        assert_eq!(store.read(&hash).unwrap(), b"hello world");
    }

    #[test]
    fn store_sets_first_reference() {
        let store = InMemoryContentStore::new();
        put(&store, b"one");
        assert_eq!(store.reference_count(&ContentHash::of(b"one")), 1);
    }

    #[test]
    fn second_store_is_a_no_op() {
        let store = InMemoryContentStore::new();
        assert_eq!(put(&store, b"same"), StoreOutcome::Written);
        assert_eq!(put(&store, b"same"), StoreOutcome::AlreadyPresent);
        assert_eq!(store.len(), 1);
        assert_eq!(store.reference_count(&ContentHash::of(b"same")), 1);
    }

    #[test]
    fn mismatched_content_is_rejected() {
        let store = InMemoryContentStore::new();
        let wrong_key = ContentHash::of(b"expected");
        let err = store.store(&wrong_key, &mut &b"actual"[..]).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(store.is_empty());
        assert_eq!(store.reference_count(&wrong_key), 0);
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    #[test]
    fn increment_after_store() {
        let store = InMemoryContentStore::new();
        put(&store, b"shared");
        let hash = ContentHash::of(b"shared");
        assert_eq!(store.increment_reference(&hash), 2);
        assert_eq!(store.reference_count(&hash), 2);
    }

    #[test]
    fn reconstruct_replaces_counts() {
        let store = InMemoryContentStore::new();
        put(&store, b"a");
        let a = ContentHash::of(b"a");
        let b = ContentHash::of(b"b");
        store.reconstruct_references(&mut vec![b, b, b].into_iter());
        assert_eq!(store.reference_count(&a), 0);
        assert_eq!(store.reference_count(&b), 3);
    }

    // -----------------------------------------------------------------------
    // Utility methods
    // -----------------------------------------------------------------------

    #[test]
    fn total_bytes() {
        let store = InMemoryContentStore::new();
        put(&store, b"12345");
        put(&store, b"123456789");
        assert_eq!(store.total_bytes(), 14);
        assert_eq!(store.blob_count().unwrap(), 2);
    }

    #[test]
    fn all_hashes_is_sorted() {
        let store = InMemoryContentStore::new();
        for data in [&b"aaa"[..], b"bbb", b"ccc"] {
            put(&store, data);
        }
        let hashes = store.all_hashes();
        assert_eq!(hashes.len(), 3);
        for w in hashes.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    // -----------------------------------------------------------------------
    // Concurrent claims
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_stores_of_same_content_write_once() {
        let store = Arc::new(InMemoryContentStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || put(&store, b"contended"))
            })
            .collect();

        let written = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .filter(|outcome| *outcome == StoreOutcome::Written)
            .count();
        assert_eq!(written, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.reference_count(&ContentHash::of(b"contended")), 1);
    }

    #[test]
    fn debug_format() {
        let store = InMemoryContentStore::new();
        put(&store, b"x");
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryContentStore"));
        assert!(debug.contains("blob_count"));
    }
}
