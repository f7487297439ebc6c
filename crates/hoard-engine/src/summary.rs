use serde::{Deserialize, Serialize};

use crate::observer::FileAction;

/// Statistics of one backup run, returned by value from the orchestrator.
///
/// Only regular files count towards `files_processed`; directories are
/// tallied separately in `directories_created`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub files_processed: u64,
    pub files_skipped: u64,
    pub files_copied: u64,
    pub files_new: u64,
    pub files_modified: u64,
    pub files_deduped: u64,
    pub blobs_stored: u64,
    pub directories_created: u64,
    pub errors: u64,
    pub persist_warnings: u64,
    /// Size of every processed file, skipped ones included.
    pub total_bytes: u64,
    /// Bytes written into the mirrored tree.
    pub bytes_copied: u64,
    /// Bytes written into new blobs.
    pub bytes_stored: u64,
    /// Bytes that referenced an existing blob instead of storing a new one.
    pub bytes_deduplicated: u64,
}

impl BackupSummary {
    /// Fold another partial summary into this one.
    pub fn merge(&mut self, other: &BackupSummary) {
        self.files_processed += other.files_processed;
        self.files_skipped += other.files_skipped;
        self.files_copied += other.files_copied;
        self.files_new += other.files_new;
        self.files_modified += other.files_modified;
        self.files_deduped += other.files_deduped;
        self.blobs_stored += other.blobs_stored;
        self.directories_created += other.directories_created;
        self.errors += other.errors;
        self.persist_warnings += other.persist_warnings;
        self.total_bytes += other.total_bytes;
        self.bytes_copied += other.bytes_copied;
        self.bytes_stored += other.bytes_stored;
        self.bytes_deduplicated += other.bytes_deduplicated;
    }

    /// `true` when no file or directory failed. Persist warnings do not count.
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }

    /// Share of `total_bytes` that was deduplicated, in `[0, 1]`.
    pub fn dedup_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.bytes_deduplicated as f64 / self.total_bytes as f64
        }
    }

    pub(crate) fn record_action(&mut self, action: FileAction, size: u64) {
        match action {
            FileAction::New => self.files_new += 1,
            FileAction::Modified => self.files_modified += 1,
            FileAction::Deduplicated { .. } => {
                self.files_deduped += 1;
                self.bytes_deduplicated += size;
            }
            FileAction::Forced => {}
            FileAction::Skipped(_) => self.files_skipped += 1,
        }
        if action.is_copy() {
            self.files_copied += 1;
        }
    }
}
