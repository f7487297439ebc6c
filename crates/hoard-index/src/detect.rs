//! Manifest-based change detection.

use hoard_types::{ContentHash, FileRecord};

use crate::manifest::Manifest;

/// How the detector treats prior manifest state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetectMode {
    /// Trust the manifest: skip files whose metadata or content is unchanged.
    #[default]
    Incremental,
    /// Ignore the manifest: hash and copy everything.
    Full,
}

/// Why a file was skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Size and modification time equal the manifest record; not hashed.
    MetadataMatch,
    /// Metadata drifted but the content hash is unchanged.
    ContentUnchanged,
}

/// Per-file verdict of the change detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    /// No manifest entry for the path.
    CopyNew,
    /// The content hash differs from the recorded one.
    CopyModified,
    /// Nothing to copy; the manifest record is still refreshed.
    Skip(SkipReason),
    /// Full mode: copied regardless of prior state.
    CopyForced,
}

impl Decision {
    /// Whether the file's bytes must be copied to the destination.
    pub fn requires_copy(&self) -> bool {
        !matches!(self, Decision::Skip(_))
    }
}

/// Result of classifying one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub decision: Decision,
    /// The file's content hash: freshly computed, or reused from the manifest
    /// on the metadata fast path.
    pub hash: ContentHash,
    /// Whether the file was actually read and hashed.
    pub hashed: bool,
}

impl Classification {
    /// The manifest record to store for this file after the run.
    pub fn record(&self, size: u64, modified: i64) -> FileRecord {
        FileRecord::new(self.hash, size, modified)
    }
}

/// Decides, per file, whether content must be hashed and copied.
///
/// The metadata fast path trusts `(size, modified)`: a content change that
/// preserves both goes undetected.
#[derive(Clone, Copy, Debug)]
pub struct ChangeDetector<'a> {
    manifest: &'a Manifest,
    mode: DetectMode,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(manifest: &'a Manifest, mode: DetectMode) -> Self {
        Self { manifest, mode }
    }

    /// Classify `relative_path` given its current size and modification time.
    ///
    /// `hash_fn` is called at most once, and only when the content must be
    /// fingerprinted. Its error is returned unchanged; no decision is made
    /// for a file that could not be hashed.
    pub fn classify<E, F>(
        &self,
        relative_path: &str,
        size: u64,
        modified: i64,
        hash_fn: F,
    ) -> Result<Classification, E>
    where
        F: FnOnce() -> Result<ContentHash, E>,
    {
        let previous = match self.mode {
            DetectMode::Full => None,
            DetectMode::Incremental => self.manifest.get(relative_path),
        };

        let Some(previous) = previous else {
            let decision = match self.mode {
                DetectMode::Full => Decision::CopyForced,
                DetectMode::Incremental => Decision::CopyNew,
            };
            return Ok(Classification {
                decision,
                hash: hash_fn()?,
                hashed: true,
            });
        };

        if previous.matches_metadata(size, modified) {
            return Ok(Classification {
                decision: Decision::Skip(SkipReason::MetadataMatch),
                hash: previous.hash,
                hashed: false,
            });
        }

        let hash = hash_fn()?;
        let decision = if hash == previous.hash {
            Decision::Skip(SkipReason::ContentUnchanged)
        } else {
            Decision::CopyModified
        };
        Ok(Classification {
            decision,
            hash,
            hashed: true,
        })
    }
}
