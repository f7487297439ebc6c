//! Filesystem backup runs: load records, drive the orchestrator, persist.

use std::path::Path;

use hoard_index::{Manifest, PathIndex};
use hoard_store::{ContentStore, FsContentStore};
use tracing::{debug, warn};

use crate::config::BackupConfig;
use crate::destination::FsDestination;
use crate::error::BackupResult;
use crate::observer::{BackupObserver, ErrorKind};
use crate::orchestrator::{verify_source, BackupOrchestrator, BackupState};
use crate::source::FsTreeSource;
use crate::summary::BackupSummary;

/// Run one backup from `config.source` into `config.destination`.
///
/// The manifest (and, with dedup, the path index) are loaded from the
/// destination root before the walk and rewritten after it. A failure to
/// rewrite them is reported as a [`ErrorKind::Persist`] warning and does not
/// fail the run.
pub fn run_backup(config: &BackupConfig, observer: &dyn BackupObserver) -> BackupResult<BackupSummary> {
    config.validate()?;
    let root = config.destination.as_path();
    let layout = &config.layout;
    let source = FsTreeSource::new(&config.source)
        .exclude(root)
        .reserve_root_name(&layout.manifest_file)
        .reserve_root_name(&layout.index_file)
        .reserve_root_name(&layout.store_dir);
    verify_source(&source)?;

    let manifest_path = layout.manifest_path(root);
    let index_path = layout.index_path(root);

    let manifest = Manifest::load(&manifest_path)?;
    let (store, index) = if config.dedup {
        let store = FsContentStore::with_extension(layout.store_path(root), &layout.blob_extension)?;
        (Some(store), PathIndex::load(&index_path)?)
    } else {
        (None, None)
    };
    let mut state = BackupState::from_loaded(manifest, index);

    let destination = FsDestination::new(root);
    let mut orchestrator = BackupOrchestrator::new(&source, &destination)
        .with_observer(observer)
        .with_workers(config.workers);
    if let Some(store) = &store {
        orchestrator = orchestrator.with_store(store);
    }
    let mut summary = orchestrator.run(&mut state, config.mode)?;

    persist(&manifest_path, |p| state.manifest.save(p), observer, &mut summary);
    if let Some(store) = &store {
        persist(&index_path, |p| state.index.save(p), observer, &mut summary);
        debug!(blobs = ?store.blob_count().ok(), "content store closed");
    }
    Ok(summary)
}

fn persist<E: std::fmt::Display>(
    path: &Path,
    save: impl FnOnce(&Path) -> Result<(), E>,
    observer: &dyn BackupObserver,
    summary: &mut BackupSummary,
) {
    if let Err(e) = save(path) {
        warn!(path = %path.display(), error = %e, "cannot save backup records");
        summary.persist_warnings += 1;
        observer.on_error(ErrorKind::Persist, &path.display().to_string(), &e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupMode;
    use crate::error::BackupError;
    use crate::observer::NoopObserver;
    use crate::orchestrator::RunPlan;
    use hoard_types::ContentHash;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Puts a directory where the manifest will be saved once the walk starts.
    struct ManifestBlocker {
        manifest_path: PathBuf,
        errors: Mutex<Vec<ErrorKind>>,
    }

    impl BackupObserver for ManifestBlocker {
        fn on_run_start(&self, _plan: &RunPlan) {
            fs::create_dir_all(self.manifest_path.join("occupied")).unwrap();
        }

        fn on_error(&self, kind: ErrorKind, _relative_path: &str, _error: &dyn std::fmt::Display) {
            self.errors.lock().unwrap().push(kind);
        }
    }

    fn setup() -> (tempfile::TempDir, BackupConfig) {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src, "a.txt", "X");
        write(&src, "b.txt", "X");
        write(&src, "docs/c.txt", "hello");
        let config = BackupConfig::new(src, dir.path().join("dst"));
        (dir, config)
    }

    #[test]
    fn first_run_builds_mirror_store_and_records() {
        let (_dir, config) = setup();
        let summary = run_backup(&config, &NoopObserver).unwrap();

        let dst = &config.destination;
        assert!(summary.is_clean());
        assert_eq!(summary.files_processed, 3);
        assert_eq!(summary.blobs_stored, 2);
        assert_eq!(summary.files_deduped, 1);
        assert_eq!(fs::read_to_string(dst.join("docs").join("c.txt")).unwrap(), "hello");

        let blob = dst
            .join(".dedup_store")
            .join(format!("{}.bin", ContentHash::of(b"X").to_hex()));
        assert_eq!(fs::read(blob).unwrap(), b"X");

        let manifest = Manifest::load(&dst.join(".backup_manifest.txt")).unwrap().unwrap();
        assert_eq!(manifest.len(), 3);
        let index = PathIndex::load(&dst.join(".dedup_index.txt")).unwrap().unwrap();
        assert_eq!(index.get("docs/c.txt"), Some(&ContentHash::of(b"hello")));
    }

    #[test]
    fn second_run_skips_everything() {
        let (_dir, config) = setup();
        run_backup(&config, &NoopObserver).unwrap();
        let summary = run_backup(&config, &NoopObserver).unwrap();
        assert_eq!(summary.files_skipped, summary.files_processed);
        assert_eq!(summary.blobs_stored, 0);
        assert_eq!(summary.files_copied, 0);
    }

    #[test]
    fn new_file_after_first_run_is_incremental() {
        let (_dir, config) = setup();
        run_backup(&config, &NoopObserver).unwrap();
        write(&config.source, "d.txt", "hello");
        let summary = run_backup(&config, &NoopObserver).unwrap();
        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.files_deduped, 1);
        assert_eq!(summary.files_skipped, 3);
    }

    #[test]
    fn without_dedup_only_manifest_is_written() {
        let (_dir, mut config) = setup();
        config.dedup = false;
        let summary = run_backup(&config, &NoopObserver).unwrap();
        assert_eq!(summary.files_copied, 3);
        assert!(config.destination.join(".backup_manifest.txt").is_file());
        assert!(!config.destination.join(".dedup_index.txt").exists());
        assert!(!config.destination.join(".dedup_store").exists());
    }

    #[test]
    fn destination_inside_source_is_not_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "X");
        let config = BackupConfig::new(dir.path(), dir.path().join("backup"));
        run_backup(&config, &NoopObserver).unwrap();
        let summary = run_backup(&config, &NoopObserver).unwrap();
        assert_eq!(summary.files_processed, 1);
        assert!(!config.destination.join("backup").exists());
    }

    #[test]
    fn missing_source_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackupConfig::new(dir.path().join("nope"), dir.path().join("dst"));
        let err = run_backup(&config, &NoopObserver).unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
        assert!(!config.destination.exists());
    }

    #[test]
    fn source_that_is_a_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "file.txt", "x");
        let config = BackupConfig::new(dir.path().join("file.txt"), dir.path().join("dst"));
        let err = run_backup(&config, &NoopObserver).unwrap_err();
        assert!(matches!(err, BackupError::SourceNotDirectory(_)));
    }

    #[test]
    fn parallel_workers_produce_same_records() {
        let (_dir, mut config) = setup();
        config.workers = 4;
        config.mode = BackupMode::Full;
        let summary = run_backup(&config, &NoopObserver).unwrap();
        assert_eq!(summary.blobs_stored, 2);
        let index = PathIndex::load(&config.destination.join(".dedup_index.txt"))
            .unwrap()
            .unwrap();
        assert_eq!(index.get("a.txt"), index.get("b.txt"));
    }

    #[test]
    fn corrupt_manifest_line_is_ignored() {
        let (_dir, config) = setup();
        run_backup(&config, &NoopObserver).unwrap();
        let manifest_path = config.destination.join(".backup_manifest.txt");
        let mut text = fs::read_to_string(&manifest_path).unwrap();
        text.push_str("broken|line\n");
        fs::write(&manifest_path, text).unwrap();

        let summary = run_backup(&config, &NoopObserver).unwrap();
        assert_eq!(summary.files_skipped, 3);
        assert!(summary.is_clean());
    }

    #[test]
    fn unsavable_manifest_is_a_warning() {
        let (_dir, config) = setup();
        let observer = ManifestBlocker {
            manifest_path: config.destination.join(".backup_manifest.txt"),
            errors: Mutex::new(Vec::new()),
        };
        let summary = run_backup(&config, &observer).unwrap();

        assert_eq!(summary.persist_warnings, 1);
        assert!(summary.is_clean());
        assert_eq!(*observer.errors.lock().unwrap(), vec![ErrorKind::Persist]);
        assert!(config.destination.join(".dedup_index.txt").is_file());
    }

    #[test]
    fn source_entries_named_like_records_are_not_mirrored() {
        let (_dir, config) = setup();
        write(&config.source, ".backup_manifest.txt", "not a manifest");
        write(&config.source, ".dedup_store/blob.bin", "not a blob");
        write(&config.source, "docs/.dedup_index.txt", "nested is fine");

        let summary = run_backup(&config, &NoopObserver).unwrap();
        assert!(summary.is_clean());
        assert_eq!(summary.files_processed, 4);
        let manifest = Manifest::load(&config.destination.join(".backup_manifest.txt"))
            .unwrap()
            .unwrap();
        assert!(!manifest.contains(".backup_manifest.txt"));
        assert!(manifest.contains("docs/.dedup_index.txt"));
        assert!(!config.destination.join(".dedup_store").join("blob.bin").exists());
    }
}
