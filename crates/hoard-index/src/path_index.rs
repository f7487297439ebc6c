//! Authoritative path -> content hash bindings.

use std::collections::btree_map::{self, Entry};
use std::collections::BTreeMap;
use std::path::Path;

use hoard_types::ContentHash;
use tracing::debug;

use crate::codec::{format_index_line, load_file, parse_index_line, save_file};
use crate::error::IndexResult;

/// Default path index filename at the backup root.
pub const DEFAULT_INDEX_FILE: &str = ".dedup_index.txt";

/// Which content hash each backed-up path currently resolves to.
///
/// The content store's reference counts are a tally over this map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathIndex {
    entries: BTreeMap<String, ContentHash>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ContentHash> {
        self.entries.get(path)
    }

    /// Bind `path` to `hash`. Returns `true` if the binding changed.
    ///
    /// Setting the same pair again has no further effect.
    pub fn set(&mut self, path: impl Into<String>, hash: ContentHash) -> bool {
        match self.entries.entry(path.into()) {
            Entry::Occupied(mut slot) => {
                if *slot.get() == hash {
                    false
                } else {
                    slot.insert(hash);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(hash);
                true
            }
        }
    }

    /// All `(path, hash)` bindings.
    pub fn all(&self) -> btree_map::Iter<'_, String, ContentHash> {
        self.entries.iter()
    }

    /// The hash of every binding, one per path (duplicates included).
    pub fn hashes(&self) -> impl Iterator<Item = ContentHash> + '_ {
        self.entries.values().copied()
    }

    /// Load the index file. `Ok(None)` means there is none yet.
    pub fn load(path: &Path) -> IndexResult<Option<Self>> {
        let Some(records) = load_file(path, parse_index_line)? else {
            debug!(path = %path.display(), "no path index found");
            return Ok(None);
        };
        let index: Self = records.into_iter().collect();
        debug!(path = %path.display(), entries = index.len(), "path index loaded");
        Ok(Some(index))
    }

    /// Overwrite the index file with the current bindings.
    pub fn save(&self, path: &Path) -> IndexResult<()> {
        save_file(
            path,
            self.entries
                .iter()
                .map(|(path, hash)| format_index_line(path, hash)),
        )?;
        debug!(path = %path.display(), entries = self.len(), "path index saved");
        Ok(())
    }
}

impl FromIterator<(String, ContentHash)> for PathIndex {
    fn from_iter<I: IntoIterator<Item = (String, ContentHash)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
