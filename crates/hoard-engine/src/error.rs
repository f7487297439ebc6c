use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a backup run before any file is processed.
///
/// Per-file and per-directory failures never surface here: they are counted
/// in the run summary and reported to the observer.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("source directory does not exist: {0}")]
    SourceMissing(String),

    #[error("source is not a directory: {0}")]
    SourceNotDirectory(String),

    #[error("cannot inspect source {location}: {source}")]
    SourceAccess {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open content store: {0}")]
    StoreInit(#[from] hoard_store::StoreError),

    #[error("cannot load backup records: {0}")]
    Load(#[from] hoard_index::IndexError),

    #[error("cannot read configuration {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot start worker pool: {0}")]
    WorkerPool(String),
}

pub type BackupResult<T> = Result<T, BackupError>;
