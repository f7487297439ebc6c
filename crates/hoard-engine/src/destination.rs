//! Backup destinations: where the mirrored tree is written.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use crate::source::resolve;

/// Mirror of the source layout under a destination root.
pub trait Destination: Send + Sync {
    /// Create `relative_dir` and any missing parents.
    ///
    /// Returns `true` if the directory was created, `false` if it existed.
    fn ensure_dir(&self, relative_dir: &str) -> io::Result<bool>;

    /// Replace the file at `relative_path` with `content`. Returns the number
    /// of bytes written.
    fn write_file(&self, relative_path: &str, content: &mut dyn Read) -> io::Result<u64>;
}

/// Local filesystem destination.
///
/// Files are written to a temporary sibling and renamed into place, so an
/// interrupted copy never leaves a truncated file under the real name.
#[derive(Clone, Debug)]
pub struct FsDestination {
    root: PathBuf,
}

impl FsDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Destination for FsDestination {
    fn ensure_dir(&self, relative_dir: &str) -> io::Result<bool> {
        let path = resolve(&self.root, relative_dir);
        if path.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&path)?;
        Ok(true)
    }

    fn write_file(&self, relative_path: &str, content: &mut dyn Read) -> io::Result<u64> {
        let path = resolve(&self.root, relative_path);
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "destination path has no parent")
        })?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        let bytes = io::copy(content, tmp.as_file_mut())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(bytes)
    }
}

/// In-memory destination for tests.
#[derive(Debug, Default)]
pub struct MemoryDestination {
    dirs: Mutex<BTreeSet<String>>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_dirs: BTreeSet<String>,
    failing_files: BTreeSet<String>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `ensure_dir(path)` fail.
    pub fn fail_dir(mut self, path: &str) -> Self {
        self.failing_dirs.insert(path.to_string());
        self
    }

    /// Make `write_file(path)` fail.
    pub fn fail_write(mut self, path: &str) -> Self {
        self.failing_files.insert(path.to_string());
        self
    }

    /// Content written to `path`, if any.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().expect("lock poisoned").get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().expect("lock poisoned").len()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.lock().expect("lock poisoned").contains(path)
    }
}

impl Destination for MemoryDestination {
    fn ensure_dir(&self, relative_dir: &str) -> io::Result<bool> {
        if self.failing_dirs.contains(relative_dir) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        Ok(self
            .dirs
            .lock()
            .expect("lock poisoned")
            .insert(relative_dir.to_string()))
    }

    fn write_file(&self, relative_path: &str, content: &mut dyn Read) -> io::Result<u64> {
        if self.failing_files.contains(relative_path) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let mut data = Vec::new();
        content.read_to_end(&mut data)?;
        let len = data.len() as u64;
        self.files
            .lock()
            .expect("lock poisoned")
            .insert(relative_path.to_string(), data);
        Ok(len)
    }
}
