//! The per-run backup driver.
//!
//! For every directory: list it, mirror it, then process its files (hash,
//! classify, copy, store) and finally recurse into its subdirectories. File
//! processing is a pure function of shared read-only state plus the
//! interior-locked content store, so it can run on a worker pool. Its
//! outcomes are applied to the manifest, path index and summary by the
//! driving thread, in listing order.

use std::fmt;
use std::io;

use hoard_crypto::ContentHasher;
use hoard_index::{ChangeDetector, Decision, DetectMode, Manifest, PathIndex};
use hoard_store::{ContentStore, StoreOutcome};
use hoard_types::{ContentHash, FileRecord};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::config::BackupMode;
use crate::destination::Destination;
use crate::error::{BackupError, BackupResult};
use crate::observer::{BackupObserver, ErrorKind, FileAction, NoopObserver};
use crate::source::{SourceEntry, TreeSource};
use crate::summary::BackupSummary;

static NOOP: NoopObserver = NoopObserver;

/// The records carried between runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackupState {
    pub manifest: Manifest,
    pub index: PathIndex,
    /// Whether the manifest reflects an earlier run.
    pub has_history: bool,
}

impl BackupState {
    /// State for a destination that has never been backed up to.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// State from whatever record files were found; `None` means absent.
    pub fn from_loaded(manifest: Option<Manifest>, index: Option<PathIndex>) -> Self {
        Self {
            has_history: manifest.is_some(),
            manifest: manifest.unwrap_or_default(),
            index: index.unwrap_or_default(),
        }
    }
}

/// How a run was set up, as announced to the observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunPlan {
    pub requested: BackupMode,
    pub has_history: bool,
    pub dedup: bool,
    pub workers: usize,
}

impl RunPlan {
    /// The mode actually used: incremental runs without history are full.
    pub fn effective_mode(&self) -> BackupMode {
        if self.has_history {
            self.requested
        } else {
            BackupMode::Full
        }
    }
}

/// Check the source root before any work starts.
pub fn verify_source(source: &dyn TreeSource) -> BackupResult<()> {
    match source.root_is_dir() {
        Ok(true) => Ok(()),
        Ok(false) => Err(BackupError::SourceNotDirectory(source.describe())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(BackupError::SourceMissing(source.describe()))
        }
        Err(source_err) => Err(BackupError::SourceAccess {
            location: source.describe(),
            source: source_err,
        }),
    }
}

/// Drives one backup run over injected collaborators.
///
/// Without a content store the run only mirrors files and keeps the manifest
/// up to date; the path index is left alone.
pub struct BackupOrchestrator<'a> {
    source: &'a dyn TreeSource,
    destination: &'a dyn Destination,
    store: Option<&'a dyn ContentStore>,
    observer: &'a dyn BackupObserver,
    hasher: ContentHasher,
    workers: usize,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(source: &'a dyn TreeSource, destination: &'a dyn Destination) -> Self {
        Self {
            source,
            destination,
            store: None,
            observer: &NOOP,
            hasher: ContentHasher::new(),
            workers: 1,
        }
    }

    pub fn with_store(mut self, store: &'a dyn ContentStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn BackupObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Number of files processed in parallel per directory.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Back up the whole source tree, updating `state` in place.
    ///
    /// Only global conditions (bad source root, invalid settings) return an
    /// error; everything else is counted in the returned summary.
    pub fn run(&self, state: &mut BackupState, mode: BackupMode) -> BackupResult<BackupSummary> {
        verify_source(self.source)?;
        if self.workers == 0 {
            return Err(BackupError::InvalidConfig("workers must be at least 1".into()));
        }

        let plan = RunPlan {
            requested: mode,
            has_history: state.has_history,
            dedup: self.store.is_some(),
            workers: self.workers,
        };
        let detect_mode = plan.effective_mode().detect_mode();
        info!(
            source = %self.source.describe(),
            mode = ?plan.effective_mode(),
            dedup = plan.dedup,
            workers = plan.workers,
            "backup started"
        );
        self.observer.on_run_start(&plan);

        if let Some(store) = self.store {
            store.reconstruct_references(&mut state.index.hashes());
            debug!(paths = state.index.len(), "reference counts rebuilt");
        }

        let pool = if self.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
                .map_err(|e| BackupError::WorkerPool(e.to_string()))?;
            Some(pool)
        } else {
            None
        };

        let mut summary = BackupSummary::default();
        let mut pending = vec![String::new()];
        while let Some(dir) = pending.pop() {
            let subdirs = self.backup_dir(&dir, state, detect_mode, pool.as_ref(), &mut summary);
            // Reversed so the stack yields them in listing order.
            pending.extend(subdirs.into_iter().rev());
        }
        state.has_history = true;

        info!(
            processed = summary.files_processed,
            copied = summary.files_copied,
            skipped = summary.files_skipped,
            deduped = summary.files_deduped,
            errors = summary.errors,
            "backup finished"
        );
        Ok(summary)
    }

    /// Process one directory's files. Returns the subdirectories to visit.
    fn backup_dir(
        &self,
        relative_dir: &str,
        state: &mut BackupState,
        detect_mode: DetectMode,
        pool: Option<&ThreadPool>,
        summary: &mut BackupSummary,
    ) -> Vec<String> {
        self.observer.on_directory(relative_dir);
        let mut local = BackupSummary::default();

        let entries = match self.source.list(relative_dir) {
            Ok(entries) => entries,
            Err(e) => {
                self.report(&mut local, ErrorKind::DirectoryAccess, relative_dir, &e);
                summary.merge(&local);
                return Vec::new();
            }
        };
        match self.destination.ensure_dir(relative_dir) {
            Ok(true) => local.directories_created += 1,
            Ok(false) => {}
            Err(e) => {
                self.report(&mut local, ErrorKind::DirectoryCreate, relative_dir, &e);
                summary.merge(&local);
                return Vec::new();
            }
        }

        let (dirs, files): (Vec<SourceEntry>, Vec<SourceEntry>) =
            entries.into_iter().partition(SourceEntry::is_dir);

        let outcomes: Vec<Result<Processed, FileFailure>> = {
            let work = FileWork {
                source: self.source,
                destination: self.destination,
                store: self.store,
                hasher: self.hasher,
                detector: ChangeDetector::new(&state.manifest, detect_mode),
                index: &state.index,
            };
            match pool {
                Some(pool) => pool.install(|| files.par_iter().map(|f| work.process(f)).collect()),
                None => files.iter().map(|f| work.process(f)).collect(),
            }
        };

        for (entry, outcome) in files.iter().zip(outcomes) {
            self.apply(entry, outcome, state, &mut local);
        }

        summary.merge(&local);
        dirs.into_iter().map(|d| d.relative_path).collect()
    }

    fn apply(
        &self,
        entry: &SourceEntry,
        outcome: Result<Processed, FileFailure>,
        state: &mut BackupState,
        summary: &mut BackupSummary,
    ) {
        let path = entry.relative_path.as_str();
        summary.files_processed += 1;
        summary.total_bytes += entry.size;

        let processed = match outcome {
            Ok(processed) => processed,
            Err(failure) => {
                self.report(summary, failure.kind, path, &failure.message);
                return;
            }
        };

        summary.record_action(processed.action, entry.size);
        summary.bytes_copied += processed.bytes_copied;
        if processed.blob_written {
            summary.blobs_stored += 1;
            summary.bytes_stored += entry.size;
        }

        state.manifest.insert(path, processed.record);
        if self.store.is_some() {
            state.index.set(path, processed.record.hash);
        }
        self.observer.on_classified(path, processed.action);
    }

    fn report(
        &self,
        summary: &mut BackupSummary,
        kind: ErrorKind,
        path: &str,
        error: &dyn fmt::Display,
    ) {
        warn!(kind = ?kind, path, error = %error, "backup error");
        summary.errors += 1;
        self.observer.on_error(kind, path, error);
    }
}

/// A file that was fully handled.
#[derive(Clone, Copy, Debug)]
struct Processed {
    action: FileAction,
    record: FileRecord,
    bytes_copied: u64,
    blob_written: bool,
}

/// A file that failed; its records are left untouched.
#[derive(Debug)]
struct FileFailure {
    kind: ErrorKind,
    message: String,
}

impl FileFailure {
    fn new(kind: ErrorKind, error: impl fmt::Display) -> Self {
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// How a file's hash ended up bound in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Binding {
    /// This file's content was written as a new blob.
    Stored,
    /// An existing blob gained a reference.
    Referenced,
    /// The path index already bound this path to the hash.
    AlreadyBound,
    /// No store in this run.
    Untracked,
}

/// Everything a worker needs to process one file. Read-only apart from the
/// store, which locks internally.
struct FileWork<'a> {
    source: &'a dyn TreeSource,
    destination: &'a dyn Destination,
    store: Option<&'a dyn ContentStore>,
    hasher: ContentHasher,
    detector: ChangeDetector<'a>,
    index: &'a PathIndex,
}

impl FileWork<'_> {
    fn process(&self, entry: &SourceEntry) -> Result<Processed, FileFailure> {
        let path = entry.relative_path.as_str();
        let classification = self
            .detector
            .classify(path, entry.size, entry.modified, || self.hash(path))
            .map_err(|e| FileFailure::new(ErrorKind::Hash, e))?;
        let hash = classification.hash;
        let record = classification.record(entry.size, entry.modified);

        if let Decision::Skip(reason) = classification.decision {
            // Records from a run without a store may name content that has
            // no blob yet.
            let binding = match self.index.get(path) {
                Some(bound) if *bound == hash => Binding::AlreadyBound,
                _ => self.bind(path, &hash)?,
            };
            return Ok(Processed {
                action: FileAction::Skipped(reason),
                record,
                bytes_copied: 0,
                blob_written: binding == Binding::Stored,
            });
        }

        let bytes_copied = self
            .copy(path)
            .map_err(|e| FileFailure::new(ErrorKind::Copy, e))?;
        let binding = self.bind(path, &hash)?;
        let decision = classification.decision;
        let action = match binding {
            Binding::Stored if decision == Decision::CopyModified => FileAction::Modified,
            Binding::Stored => FileAction::New,
            // A path already bound keeps its single reference.
            Binding::Referenced | Binding::AlreadyBound => FileAction::Deduplicated {
                modified: decision == Decision::CopyModified,
            },
            Binding::Untracked => match decision {
                Decision::CopyNew => FileAction::New,
                Decision::CopyModified => FileAction::Modified,
                _ => FileAction::Forced,
            },
        };
        debug!(path, hash = %hash.short_hex(), ?action, "file processed");

        Ok(Processed {
            action,
            record,
            bytes_copied,
            blob_written: binding == Binding::Stored,
        })
    }

    fn hash(&self, path: &str) -> io::Result<ContentHash> {
        let reader = self.source.open(path)?;
        self.hasher.hash_reader(reader)
    }

    fn copy(&self, path: &str) -> io::Result<u64> {
        let mut reader = self.source.open(path)?;
        self.destination.write_file(path, &mut reader)
    }

    /// Make sure a blob for `hash` exists and counts this path.
    fn bind(&self, path: &str, hash: &ContentHash) -> Result<Binding, FileFailure> {
        let Some(store) = self.store else {
            return Ok(Binding::Untracked);
        };
        let store_err = |e: &dyn fmt::Display| FileFailure::new(ErrorKind::StoreWrite, e);
        let already_bound = self.index.get(path) == Some(hash);

        if store.exists(hash).map_err(|e| store_err(&e))? {
            if already_bound {
                return Ok(Binding::AlreadyBound);
            }
            store.increment_reference(hash);
            return Ok(Binding::Referenced);
        }

        let mut reader = self.source.open(path).map_err(|e| store_err(&e))?;
        match store.store(hash, &mut reader).map_err(|e| store_err(&e))? {
            StoreOutcome::Written => Ok(Binding::Stored),
            StoreOutcome::AlreadyPresent if already_bound => Ok(Binding::AlreadyBound),
            StoreOutcome::AlreadyPresent => {
                store.increment_reference(hash);
                Ok(Binding::Referenced)
            }
        }
    }
}
