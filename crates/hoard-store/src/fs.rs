use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hoard_crypto::HashingReader;
use hoard_types::ContentHash;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::refs::ReferenceCounts;
use crate::traits::{ContentStore, StoreOutcome};

/// Default name of the blob directory under the backup root.
pub const DEFAULT_STORE_DIR: &str = ".dedup_store";

/// Default file extension of blob files.
pub const DEFAULT_BLOB_EXTENSION: &str = "bin";

/// Filesystem content store: one file per blob, named `<hex>.<ext>`.
///
/// Blobs are streamed into a temporary file inside the store directory,
/// verified against their key, and renamed into place. A crash mid-write
/// leaves at most an orphaned temp file, never a partial blob under a hash
/// name.
pub struct FsContentStore {
    dir: PathBuf,
    extension: String,
    refs: ReferenceCounts,
    claims: ClaimTable,
}

impl FsContentStore {
    /// Open the store at `dir`, creating it (and its parents) if missing.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::with_extension(dir, DEFAULT_BLOB_EXTENSION)
    }

    /// Open the store with a custom blob file extension.
    pub fn with_extension(dir: impl Into<PathBuf>, extension: &str) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "content store opened");
        Ok(Self {
            dir,
            extension: extension.trim_start_matches('.').to_string(),
            refs: ReferenceCounts::new(),
            claims: ClaimTable::default(),
        })
    }

    /// Directory holding the blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the blob for `hash` (whether or not it exists).
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(format!("{}.{}", hash.to_hex(), self.extension))
    }

    fn write_blob(&self, hash: &ContentHash, content: &mut dyn Read) -> StoreResult<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        let mut reader = HashingReader::new(content);
        io::copy(&mut reader, tmp.as_file_mut())?;

        let computed = reader.finalize();
        if computed != *hash {
            // Dropping `tmp` removes the temp file.
            return Err(StoreError::HashMismatch {
                expected: *hash,
                computed,
            });
        }

        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        let path = self.blob_path(hash);
        tmp.persist(&path).map_err(|e| StoreError::Persist {
            path: path.clone(),
            source: e.error,
        })?;
        debug!(hash = %hash.short_hex(), bytes = reader.bytes_read(), "blob written");
        Ok(())
    }
}

impl ContentStore for FsContentStore {
    fn exists(&self, hash: &ContentHash) -> StoreResult<bool> {
        match fs::metadata(self.blob_path(hash)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, hash: &ContentHash, content: &mut dyn Read) -> StoreResult<StoreOutcome> {
        let claim = self.claims.claim(hash);
        let outcome = {
            let _guard = claim.lock().expect("lock poisoned");
            match self.exists(hash) {
                Ok(true) => Ok(StoreOutcome::AlreadyPresent),
                Ok(false) => self.write_blob(hash, content).map(|()| {
                    self.refs.increment(hash);
                    StoreOutcome::Written
                }),
                Err(e) => Err(e),
            }
        };

        self.claims.release(hash, claim);
        outcome
    }

    fn blob_count(&self) -> StoreResult<usize> {
        let suffix = format!(".{}", self.extension);
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && entry.file_name().to_string_lossy().ends_with(&suffix)
            {
                count += 1;
            }
        }
        Ok(count)
    }

    fn references(&self) -> &ReferenceCounts {
        &self.refs
    }
}

impl std::fmt::Debug for FsContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsContentStore")
            .field("dir", &self.dir)
            .field("extension", &self.extension)
            .field("refs", &self.refs)
            .finish()
    }
}

/// Per-hash write locks.
///
/// Writers of different hashes proceed in parallel; writers of the same hash
/// queue behind one lock, and all but the first find the blob present. An
/// entry stays in the table until its last holder releases it, so a late
/// writer always queues behind the same lock as the ones still waiting.
#[derive(Default)]
struct ClaimTable {
    locks: Mutex<HashMap<ContentHash, Arc<Mutex<()>>>>,
}

impl ClaimTable {
    fn claim(&self, hash: &ContentHash) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock poisoned");
        Arc::clone(locks.entry(*hash).or_default())
    }

    fn release(&self, hash: &ContentHash, claim: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().expect("lock poisoned");
        // Clones are only made under the table lock: two holders means the
        // table and this writer, with nobody queued.
        if Arc::strong_count(&claim) == 2 {
            locks.remove(hash);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().expect("lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    /// Yields `data` in one read after `delay`, or fails after it.
    struct SlowReader {
        delay: Duration,
        data: &'static [u8],
        fail: bool,
        done: bool,
    }

    impl SlowReader {
        fn new(delay_ms: u64, data: &'static [u8]) -> Self {
            Self {
                delay: Duration::from_millis(delay_ms),
                data,
                fail: false,
                done: false,
            }
        }

        fn failing(delay_ms: u64) -> Self {
            Self {
                fail: true,
                ..Self::new(delay_ms, b"")
            }
        }
    }

    impl Read for SlowReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.done {
                return Ok(0);
            }
            thread::sleep(self.delay);
            self.done = true;
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "source vanished"));
            }
            buf[..self.data.len()].copy_from_slice(self.data);
            Ok(self.data.len())
        }
    }

    fn put(store: &FsContentStore, data: &[u8]) -> StoreResult<StoreOutcome> {
        store.store(&ContentHash::of(data), &mut &data[..])
    }

    #[test]
    fn open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("backup").join(DEFAULT_STORE_DIR);
        let store = FsContentStore::open(&store_dir).unwrap();
        assert!(store_dir.is_dir());
        assert_eq!(store.blob_count().unwrap(), 0);
    }

    #[test]
    fn blob_is_named_by_hash_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).unwrap();
        let hash = ContentHash::of(b"X");
        let path = store.blob_path(&hash);
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("{}.bin", hash.to_hex())
        );
    }

    #[test]
    fn store_writes_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).unwrap();
        assert_eq!(put(&store, b"payload").unwrap(), StoreOutcome::Written);

        let hash = ContentHash::of(b"payload");
        assert!(store.exists(&hash).unwrap());
        assert_eq!(fs::read(store.blob_path(&hash)).unwrap(), b"payload");
        assert_eq!(store.reference_count(&hash), 1);
    }

    #[test]
    fn existing_blob_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).unwrap();
        put(&store, b"once").unwrap();
        assert_eq!(put(&store, b"once").unwrap(), StoreOutcome::AlreadyPresent);
        assert_eq!(store.blob_count().unwrap(), 1);
        assert_eq!(store.reference_count(&ContentHash::of(b"once")), 1);
    }

    #[test]
    fn exists_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FsContentStore::open(dir.path()).unwrap();
            put(&store, b"durable").unwrap();
        }
        let store = FsContentStore::open(dir.path()).unwrap();
        let hash = ContentHash::of(b"durable");
        assert!(store.exists(&hash).unwrap());
        // Counts are not persisted; they come back via reconstruct_references.
        assert_eq!(store.reference_count(&hash), 0);
    }

    #[test]
    fn hash_mismatch_leaves_no_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).unwrap();
        let key = ContentHash::of(b"before edit");
        let err = store.store(&key, &mut &b"after edit"[..]).unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(!store.exists(&key).unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn custom_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::with_extension(dir.path(), ".blob").unwrap();
        put(&store, b"ext").unwrap();
        let path = store.blob_path(&ContentHash::of(b"ext"));
        assert_eq!(path.extension().unwrap(), "blob");
        assert_eq!(store.blob_count().unwrap(), 1);
    }

    #[test]
    fn blob_count_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).unwrap();
        put(&store, b"real").unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a blob").unwrap();
        assert_eq!(store.blob_count().unwrap(), 1);
    }

    #[test]
    fn concurrent_writers_of_same_hash_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsContentStore::open(dir.path()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || put(&store, b"race").unwrap())
            })
            .collect();

        let written = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .filter(|o| *o == StoreOutcome::Written)
            .count();
        assert_eq!(written, 1);
        assert_eq!(store.blob_count().unwrap(), 1);
        assert_eq!(store.reference_count(&ContentHash::of(b"race")), 1);
    }

    #[test]
    fn claim_outlives_a_release_while_others_wait() {
        let table = ClaimTable::default();
        let hash = ContentHash::of(b"k");
        let first = table.claim(&hash);
        let queued = table.claim(&hash);

        table.release(&hash, first);
        assert_eq!(table.len(), 1);
        let late = table.claim(&hash);
        assert!(Arc::ptr_eq(&queued, &late));

        table.release(&hash, queued);
        table.release(&hash, late);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn failed_writer_does_not_let_two_later_writers_both_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsContentStore::open(dir.path()).unwrap());
        let hash = ContentHash::of(b"late");

        let spawn = |start_ms: u64, mut reader: SlowReader| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(start_ms));
                store.store(&hash, &mut reader)
            })
        };
        // The first writer fails while the second is queued; the third
        // arrives after the failure, while the second is still writing.
        let failing = spawn(0, SlowReader::failing(300));
        let queued = spawn(100, SlowReader::new(600, b"late"));
        let late = spawn(500, SlowReader::new(0, b"late"));

        assert!(failing.join().expect("thread should not panic").is_err());
        let outcomes: Vec<StoreOutcome> = [queued, late]
            .into_iter()
            .map(|h| h.join().expect("thread should not panic").unwrap())
            .collect();
        let written = outcomes.iter().filter(|o| **o == StoreOutcome::Written).count();
        assert_eq!(written, 1);
        assert_eq!(store.reference_count(&hash), 1);
        assert_eq!(store.blob_count().unwrap(), 1);
    }
}
