//! Incremental, deduplicated backups.
//!
//! [`BackupOrchestrator`] walks a [`TreeSource`], mirrors it into a
//! [`Destination`], and keeps three pieces of state consistent across runs:
//! the [`Manifest`](hoard_index::Manifest) for change detection, the
//! [`PathIndex`](hoard_index::PathIndex) binding paths to content, and an
//! optional [`ContentStore`](hoard_store::ContentStore) holding one blob per
//! distinct content.
//!
//! [`run_backup`] wires the filesystem implementations together from a
//! [`BackupConfig`].

pub mod config;
pub mod destination;
pub mod error;
pub mod observer;
pub mod orchestrator;
pub mod session;
pub mod source;
pub mod summary;

pub use config::{BackupConfig, BackupMode, StoreLayout};
pub use destination::{Destination, FsDestination, MemoryDestination};
pub use error::{BackupError, BackupResult};
pub use observer::{BackupObserver, ErrorKind, FileAction, NoopObserver};
pub use orchestrator::{verify_source, BackupOrchestrator, BackupState, RunPlan};
pub use session::run_backup;
pub use source::{EntryKind, FsTreeSource, MemoryTreeSource, SourceEntry, TreeSource};
pub use summary::BackupSummary;

// Re-export the types embedders need alongside the engine.
pub use hoard_index::{Decision, SkipReason};
pub use hoard_store::{ContentStore, FsContentStore, InMemoryContentStore};
pub use hoard_types::{ContentHash, FileRecord};
