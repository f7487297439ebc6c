use std::io::Read;

use hoard_types::ContentHash;

use crate::error::StoreResult;
use crate::refs::ReferenceCounts;

/// What a [`ContentStore::store`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    /// This call wrote the blob and bound its first reference.
    Written,
    /// A blob for the hash already existed (or another writer won the claim).
    /// Nothing was written and no reference was added; the caller binds its
    /// path with [`ContentStore::increment_reference`].
    AlreadyPresent,
}

/// Content-addressed blob storage with per-hash reference counts.
///
/// All implementations must satisfy these invariants:
/// - A blob is written at most once per hash and never modified afterwards.
/// - A blob becomes visible to `exists` only once it is completely written.
/// - For any hash, concurrent `store` calls yield exactly one `Written`.
/// - Reference counts live in memory only; they are rebuilt from the path
///   index at the start of every run with `reconstruct_references`.
pub trait ContentStore: Send + Sync {
    /// Whether a blob is stored under `hash`.
    fn exists(&self, hash: &ContentHash) -> StoreResult<bool>;

    /// Stream `content` into the blob keyed by `hash`.
    ///
    /// The streamed bytes are verified against `hash` before the blob is made
    /// visible. On `Written`, the reference count of `hash` is incremented.
    fn store(&self, hash: &ContentHash, content: &mut dyn Read) -> StoreResult<StoreOutcome>;

    /// Number of blobs currently held.
    fn blob_count(&self) -> StoreResult<usize>;

    /// The in-memory reference table.
    fn references(&self) -> &ReferenceCounts;

    /// Bind one more path to an existing blob. Returns the new count.
    fn increment_reference(&self, hash: &ContentHash) -> u64 {
        self.references().increment(hash)
    }

    /// Number of paths currently bound to `hash`.
    fn reference_count(&self, hash: &ContentHash) -> u64 {
        self.references().get(hash)
    }

    /// Replace all reference counts with a tally of `hashes`.
    fn reconstruct_references(&self, hashes: &mut dyn Iterator<Item = ContentHash>) {
        self.references().rebuild(hashes);
    }
}
