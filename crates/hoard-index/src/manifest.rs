//! Per-path change-detection records.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::path::Path;

use hoard_types::FileRecord;
use tracing::debug;

use crate::codec::{format_manifest_line, load_file, parse_manifest_line, save_file};
use crate::error::IndexResult;

/// Default manifest filename at the backup root.
pub const DEFAULT_MANIFEST_FILE: &str = ".backup_manifest.txt";

/// Last-observed `{hash, size, modified}` of every path seen by a previous
/// run.
///
/// Absence of a path means "never seen", not "deleted": deletions are not
/// tracked. The map is sorted only so that saved files are stable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, FileRecord>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Record `record` for `path`, replacing any previous record whole.
    pub fn insert(&mut self, path: impl Into<String>, record: FileRecord) -> Option<FileRecord> {
        self.entries.insert(path.into(), record)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FileRecord> {
        self.entries.iter()
    }

    /// Load the manifest file. `Ok(None)` means there is none yet (first run).
    pub fn load(path: &Path) -> IndexResult<Option<Self>> {
        let Some(records) = load_file(path, parse_manifest_line)? else {
            debug!(path = %path.display(), "no manifest found");
            return Ok(None);
        };
        let manifest: Self = records.into_iter().collect();
        debug!(path = %path.display(), entries = manifest.len(), "manifest loaded");
        Ok(Some(manifest))
    }

    /// Overwrite the manifest file with the current entries.
    pub fn save(&self, path: &Path) -> IndexResult<()> {
        save_file(
            path,
            self.entries
                .iter()
                .map(|(path, record)| format_manifest_line(path, record)),
        )?;
        debug!(path = %path.display(), entries = self.len(), "manifest saved");
        Ok(())
    }
}

impl FromIterator<(String, FileRecord)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (String, FileRecord)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = (&'a String, &'a FileRecord);
    type IntoIter = btree_map::Iter<'a, String, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_types::ContentHash;
    use proptest::prelude::*;

    fn record(content: &[u8], size: u64, modified: i64) -> FileRecord {
        FileRecord::new(ContentHash::of(content), size, modified)
    }

    #[test]
    fn insert_replaces_whole_record() {
        let mut manifest = Manifest::new();
        manifest.insert("a.txt", record(b"X", 1, 10));
        let old = manifest.insert("a.txt", record(b"Y", 2, 20));
        assert_eq!(old, Some(record(b"X", 1, 10)));
        assert_eq!(manifest.get("a.txt"), Some(&record(b"Y", 2, 20)));
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn load_absent_file_means_first_run() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Manifest::load(&dir.path().join(DEFAULT_MANIFEST_FILE))
            .unwrap()
            .is_none());
    }

    #[test]
    fn empty_file_loads_as_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MANIFEST_FILE);
        std::fs::write(&path, "").unwrap();
        let manifest = Manifest::load(&path).unwrap().unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MANIFEST_FILE);
        let mut manifest = Manifest::new();
        manifest.insert("a.txt", record(b"X", 1, 1_700_000_000));
        manifest.insert("sub/b.txt", record(b"Y", 22, -3));
        manifest.save(&path).unwrap();

        assert_eq!(Manifest::load(&path).unwrap().unwrap(), manifest);
    }

    #[test]
    fn corrupt_line_does_not_abort_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MANIFEST_FILE);
        let hash = ContentHash::of(b"X");
        std::fs::write(
            &path,
            format!("a.txt|{hash}|1|5\nbroken|{hash}|1\nc.txt|{hash}|3|7\n"),
        )
        .unwrap();

        let manifest = Manifest::load(&path).unwrap().unwrap();
        assert_eq!(manifest.len(), 2);
        assert!(manifest.contains("a.txt"));
        assert!(!manifest.contains("broken"));
        assert_eq!(manifest.get("c.txt").unwrap().modified, 7);
    }

    #[test]
    fn save_is_full_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_MANIFEST_FILE);
        let mut first = Manifest::new();
        first.insert("gone.txt", record(b"X", 1, 1));
        first.save(&path).unwrap();

        let mut second = Manifest::new();
        second.insert("kept.txt", record(b"Y", 2, 2));
        second.save(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap().unwrap();
        assert!(!loaded.contains("gone.txt"));
        assert_eq!(loaded.len(), 1);
    }

    proptest! {
        #[test]
        fn any_manifest_survives_save_and_load(
            entries in proptest::collection::btree_map(
                "[a-zA-Z0-9_./| -]{1,24}",
                (any::<[u8; 4]>(), any::<u64>(), any::<i64>()),
                0..20,
            )
        ) {
            let manifest: Manifest = entries
                .into_iter()
                .map(|(path, (seed, size, modified))| {
                    (path, FileRecord::new(ContentHash::of(&seed), size, modified))
                })
                .collect();
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join(DEFAULT_MANIFEST_FILE);
            manifest.save(&path).unwrap();
            prop_assert_eq!(Manifest::load(&path).unwrap().unwrap(), manifest);
        }
    }
}
