use std::fs;
use std::path::{Path, PathBuf};

use hoard_index::{DetectMode, DEFAULT_INDEX_FILE, DEFAULT_MANIFEST_FILE};
use hoard_store::{DEFAULT_BLOB_EXTENSION, DEFAULT_STORE_DIR};
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};

/// Requested run mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// Copy only new and changed files. Falls back to full when there is no
    /// previous manifest.
    #[default]
    Incremental,
    /// Copy every file.
    Full,
}

impl BackupMode {
    pub fn detect_mode(self) -> DetectMode {
        match self {
            BackupMode::Incremental => DetectMode::Incremental,
            BackupMode::Full => DetectMode::Full,
        }
    }
}

/// Names of the bookkeeping files under the destination root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreLayout {
    pub manifest_file: String,
    pub index_file: String,
    pub store_dir: String,
    pub blob_extension: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            index_file: DEFAULT_INDEX_FILE.to_string(),
            store_dir: DEFAULT_STORE_DIR.to_string(),
            blob_extension: DEFAULT_BLOB_EXTENSION.to_string(),
        }
    }
}

impl StoreLayout {
    pub fn manifest_path(&self, root: &Path) -> PathBuf {
        root.join(&self.manifest_file)
    }

    pub fn index_path(&self, root: &Path) -> PathBuf {
        root.join(&self.index_file)
    }

    pub fn store_path(&self, root: &Path) -> PathBuf {
        root.join(&self.store_dir)
    }

    fn validate(&self) -> BackupResult<()> {
        for (field, value) in [
            ("manifest_file", &self.manifest_file),
            ("index_file", &self.index_file),
            ("store_dir", &self.store_dir),
            ("blob_extension", &self.blob_extension),
        ] {
            if value.trim().is_empty() {
                return Err(BackupError::InvalidConfig(format!("layout.{field} is empty")));
            }
            if value.contains(['/', '\\']) {
                return Err(BackupError::InvalidConfig(format!(
                    "layout.{field} must be a plain name, got {value:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Settings of one backup run.
///
/// A TOML file may provide any subset of the fields; missing ones take their
/// defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub mode: BackupMode,
    /// Keep a content-addressed store and path index next to the mirror.
    pub dedup: bool,
    /// Files hashed and copied in parallel per directory. 1 runs sequentially.
    pub workers: usize,
    pub layout: StoreLayout,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            destination: PathBuf::new(),
            mode: BackupMode::Incremental,
            dedup: true,
            workers: 1,
            layout: StoreLayout::default(),
        }
    }
}

impl BackupConfig {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> BackupResult<Self> {
        toml::from_str(text).map_err(|e| BackupError::InvalidConfig(e.to_string()))
    }

    /// Read a TOML configuration file.
    pub fn load(path: &Path) -> BackupResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| BackupError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> BackupResult<()> {
        if self.source.as_os_str().is_empty() {
            return Err(BackupError::InvalidConfig("source path is required".into()));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(BackupError::InvalidConfig("destination path is required".into()));
        }
        if self.source == self.destination {
            return Err(BackupError::InvalidConfig(
                "source and destination must differ".into(),
            ));
        }
        if self.workers == 0 {
            return Err(BackupError::InvalidConfig("workers must be at least 1".into()));
        }
        self.layout.validate()
    }
}
