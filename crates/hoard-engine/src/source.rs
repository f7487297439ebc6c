//! Tree sources: where the files being backed up come from.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Kind of a listed entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One child of a listed directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceEntry {
    /// Final path component.
    pub name: String,
    /// `/`-separated path relative to the source root.
    pub relative_path: String,
    pub kind: EntryKind,
    /// Byte length (0 for directories).
    pub size: u64,
    /// Last-modified time in seconds since the Unix epoch.
    pub modified: i64,
}

impl SourceEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Directory enumeration and file reads, relative to a source root.
///
/// The root itself is addressed by the empty relative path.
pub trait TreeSource: Send + Sync {
    /// Human-readable location of the root, for error messages.
    fn describe(&self) -> String;

    /// Whether the root exists and is a directory. `NotFound` means missing.
    fn root_is_dir(&self) -> io::Result<bool>;

    /// Direct children of `relative_dir`, never including `.` or `..`.
    fn list(&self, relative_dir: &str) -> io::Result<Vec<SourceEntry>>;

    /// Open a file for reading.
    fn open(&self, relative_path: &str) -> io::Result<Box<dyn Read + Send + '_>>;
}

/// Join a relative directory and a child name with `/`.
pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Resolve a `/`-separated relative path under `root`.
pub fn resolve(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    path.extend(relative.split('/').filter(|part| !part.is_empty()));
    path
}

/// Seconds since the Unix epoch; negative before it.
pub fn epoch_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

/// Local filesystem tree.
///
/// Symbolic links are not followed and are left out of listings, as are
/// entries whose names are not valid UTF-8. Excluded paths (typically the
/// backup destination when it lives inside the source) are never listed.
#[derive(Clone, Debug)]
pub struct FsTreeSource {
    root: PathBuf,
    excluded: Vec<PathBuf>,
    reserved_root_names: Vec<String>,
}

impl FsTreeSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded: Vec::new(),
            reserved_root_names: Vec::new(),
        }
    }

    /// Leave `path` (and everything below it) out of listings.
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    /// Leave entries called `name` directly under the root out of listings.
    pub fn reserve_root_name(mut self, name: impl Into<String>) -> Self {
        self.reserved_root_names.push(name.into());
        self
    }

    // Resolved per listing: an excluded destination may not exist until the
    // run creates it.
    fn resolved_exclusions(&self) -> Vec<PathBuf> {
        self.excluded
            .iter()
            .filter_map(|p| fs::canonicalize(p).ok())
            .collect()
    }
}

impl TreeSource for FsTreeSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn root_is_dir(&self) -> io::Result<bool> {
        fs::metadata(&self.root).map(|meta| meta.is_dir())
    }

    fn list(&self, relative_dir: &str) -> io::Result<Vec<SourceEntry>> {
        let dir = resolve(&self.root, relative_dir);
        let excluded = self.resolved_exclusions();
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(e.into()),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let Some(name) = entry.file_name().to_str() else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if relative_dir.is_empty() && self.reserved_root_names.iter().any(|n| n == name) {
                warn!(path = %entry.path().display(), "skipping entry named like a backup record");
                continue;
            }
            let file_type = entry.file_type();
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                debug!(path = %entry.path().display(), "skipping special file");
                continue;
            };

            if kind == EntryKind::Directory && !excluded.is_empty() {
                if let Ok(canonical) = fs::canonicalize(entry.path()) {
                    if excluded.contains(&canonical) {
                        debug!(path = %entry.path().display(), "excluded from backup");
                        continue;
                    }
                }
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping entry without metadata");
                    continue;
                }
            };
            let modified = meta.modified().map(epoch_seconds).unwrap_or(0);

            entries.push(SourceEntry {
                name: name.to_string(),
                relative_path: join_relative(relative_dir, name),
                kind,
                size: if kind == EntryKind::File { meta.len() } else { 0 },
                modified,
            });
        }
        Ok(entries)
    }

    fn open(&self, relative_path: &str) -> io::Result<Box<dyn Read + Send + '_>> {
        let file = File::open(resolve(&self.root, relative_path))?;
        Ok(Box::new(file))
    }
}

#[derive(Clone, Debug)]
enum MemoryNode {
    File { content: Vec<u8>, modified: i64 },
    Directory,
}

/// In-memory tree for tests and embedding.
///
/// Listings are sorted by name. Individual directories and files can be made
/// to fail, to exercise error paths.
#[derive(Clone, Debug, Default)]
pub struct MemoryTreeSource {
    nodes: BTreeMap<String, MemoryNode>,
    failing_dirs: BTreeSet<String>,
    failing_files: BTreeSet<String>,
    missing: bool,
}

impl MemoryTreeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose root does not exist.
    pub fn missing() -> Self {
        Self {
            missing: true,
            ..Self::default()
        }
    }

    /// Add or replace a file, creating its parent directories.
    pub fn add_file(&mut self, path: &str, content: impl Into<Vec<u8>>, modified: i64) -> &mut Self {
        self.add_parents(path);
        self.nodes.insert(
            path.to_string(),
            MemoryNode::File {
                content: content.into(),
                modified,
            },
        );
        self
    }

    /// Add an (empty) directory, creating its parents.
    pub fn add_dir(&mut self, path: &str) -> &mut Self {
        self.add_parents(path);
        self.nodes.insert(path.to_string(), MemoryNode::Directory);
        self
    }

    /// Change a file's modification time without touching its content.
    pub fn touch(&mut self, path: &str, modified: i64) -> &mut Self {
        if let Some(MemoryNode::File { modified: m, .. }) = self.nodes.get_mut(path) {
            *m = modified;
        }
        self
    }

    pub fn remove(&mut self, path: &str) -> &mut Self {
        self.nodes.remove(path);
        self
    }

    /// Make `list(path)` fail.
    pub fn fail_listing(&mut self, path: &str) -> &mut Self {
        self.failing_dirs.insert(path.to_string());
        self
    }

    /// Make `open(path)` fail.
    pub fn fail_reading(&mut self, path: &str) -> &mut Self {
        self.failing_files.insert(path.to_string());
        self
    }

    fn add_parents(&mut self, path: &str) {
        let mut parent = path;
        while let Some((dir, _)) = parent.rsplit_once('/') {
            self.nodes
                .entry(dir.to_string())
                .or_insert(MemoryNode::Directory);
            parent = dir;
        }
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

impl TreeSource for MemoryTreeSource {
    fn describe(&self) -> String {
        "memory:".to_string()
    }

    fn root_is_dir(&self) -> io::Result<bool> {
        if self.missing {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"))
        } else {
            Ok(true)
        }
    }

    fn list(&self, relative_dir: &str) -> io::Result<Vec<SourceEntry>> {
        if self.failing_dirs.contains(relative_dir) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "access denied"));
        }
        if !relative_dir.is_empty()
            && !matches!(self.nodes.get(relative_dir), Some(MemoryNode::Directory))
        {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
        }

        let entries = self
            .nodes
            .iter()
            .filter(|(path, _)| parent_of(path) == relative_dir)
            .map(|(path, node)| {
                let name = path.rsplit('/').next().unwrap_or(path).to_string();
                let (kind, size, modified) = match node {
                    MemoryNode::File { content, modified } => {
                        (EntryKind::File, content.len() as u64, *modified)
                    }
                    MemoryNode::Directory => (EntryKind::Directory, 0, 0),
                };
                SourceEntry {
                    name,
                    relative_path: path.clone(),
                    kind,
                    size,
                    modified,
                }
            })
            .collect();
        Ok(entries)
    }

    fn open(&self, relative_path: &str) -> io::Result<Box<dyn Read + Send + '_>> {
        if self.failing_files.contains(relative_path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "access denied"));
        }
        match self.nodes.get(relative_path) {
            Some(MemoryNode::File { content, .. }) => Ok(Box::new(&content[..])),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        }
    }
}
