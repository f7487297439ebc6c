//! Run event notifications.
//!
//! The orchestrator never prints. Everything a user might want to see is
//! delivered to a [`BackupObserver`], always from the thread that drives the
//! run and in source listing order.

use std::fmt;

use hoard_index::SkipReason;

use crate::orchestrator::RunPlan;

/// What happened to one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileAction {
    /// Copied; its content was stored as a new blob.
    New,
    /// Copied after a content change; the new content was stored as a new blob.
    Modified,
    /// Copied; its content already had a blob, which it now references.
    Deduplicated { modified: bool },
    /// Copied by a full run without storing new content.
    Forced,
    /// Not copied.
    Skipped(SkipReason),
}

impl FileAction {
    pub fn is_copy(&self) -> bool {
        !matches!(self, FileAction::Skipped(_))
    }
}

/// Category of a non-fatal run error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The file could not be read for hashing.
    Hash,
    /// A source directory could not be listed.
    DirectoryAccess,
    /// A destination directory could not be created.
    DirectoryCreate,
    /// Copying to the destination failed.
    Copy,
    /// Writing or referencing a blob failed.
    StoreWrite,
    /// The manifest or path index could not be saved. Reported as a warning.
    Persist,
}

impl ErrorKind {
    /// Whether this kind counts against the run's exit status.
    pub fn is_fatal_to_status(&self) -> bool {
        !matches!(self, ErrorKind::Persist)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Hash => "cannot hash file",
            ErrorKind::DirectoryAccess => "cannot access directory",
            ErrorKind::DirectoryCreate => "cannot create directory",
            ErrorKind::Copy => "cannot copy file",
            ErrorKind::StoreWrite => "cannot store content",
            ErrorKind::Persist => "cannot save backup records",
        };
        f.write_str(label)
    }
}

/// Receives run events. All methods default to doing nothing.
pub trait BackupObserver {
    fn on_run_start(&self, _plan: &RunPlan) {}

    /// A directory is about to be listed. The root is `""`.
    fn on_directory(&self, _relative_dir: &str) {}

    fn on_classified(&self, _relative_path: &str, _action: FileAction) {}

    fn on_error(&self, _kind: ErrorKind, _relative_path: &str, _error: &dyn fmt::Display) {}
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl BackupObserver for NoopObserver {}
