//! Content-addressed blob storage for hoard.
//!
//! Every distinct byte sequence seen by a backup is stored exactly once,
//! under its BLAKE3 [`ContentHash`](hoard_types::ContentHash). Paths are bound
//! to blobs by the path index; the store only tracks how many paths reference
//! each blob during the current run.
//!
//! # Storage Backends
//!
//! All backends implement the [`ContentStore`] trait:
//!
//! - [`FsContentStore`] -- one file per blob under the backup root
//! - [`InMemoryContentStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written and are never deleted.
//! 2. Write-then-link: stream, verify hash, then make the blob visible.
//! 3. At most one writer wins per hash; the rest observe `AlreadyPresent`.
//! 4. Reference counts are derived state, rebuilt at the start of each run.

pub mod error;
pub mod fs;
pub mod memory;
pub mod refs;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fs::{FsContentStore, DEFAULT_BLOB_EXTENSION, DEFAULT_STORE_DIR};
pub use memory::InMemoryContentStore;
pub use refs::ReferenceCounts;
pub use traits::{ContentStore, StoreOutcome};
