use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Last-observed state of one source file, as held in the manifest.
///
/// Records are always replaced as a whole; there is no partial update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Content fingerprint at the time of observation.
    pub hash: ContentHash,
    /// Byte length.
    pub size: u64,
    /// Last-modified time, seconds since the Unix epoch.
    pub modified: i64,
}

impl FileRecord {
    pub fn new(hash: ContentHash, size: u64, modified: i64) -> Self {
        Self {
            hash,
            size,
            modified,
        }
    }

    /// Whether `size` and `modified` both equal the recorded values.
    pub fn matches_metadata(&self, size: u64, modified: i64) -> bool {
        self.size == size && self.modified == modified
    }
}
