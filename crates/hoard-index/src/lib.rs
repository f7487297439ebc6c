//! Change-detection records for hoard.
//!
//! Two small flat files at the backup root are the only memory carried
//! between runs:
//!
//! - [`Manifest`] -- path to last-observed `{hash, size, modified}`, used to
//!   avoid re-hashing unchanged files.
//! - [`PathIndex`] -- path to current content hash; the source of truth the
//!   store's reference counts are rebuilt from.
//!
//! Both are loaded once, mutated in memory, and rewritten in full at the end
//! of a run. [`ChangeDetector`] turns a manifest plus fresh metadata into a
//! per-file [`Decision`].

pub mod codec;
pub mod detect;
pub mod error;
pub mod manifest;
pub mod path_index;

pub use detect::{ChangeDetector, Classification, Decision, DetectMode, SkipReason};
pub use error::{IndexError, IndexResult};
pub use manifest::{Manifest, DEFAULT_MANIFEST_FILE};
pub use path_index::{PathIndex, DEFAULT_INDEX_FILE};
