//! File persistence for the state document.

use super::memory::StateDocument;
use crate::core::{Result, UpgradeError};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Exclusive OS lock on the `<state>.lock` sibling of a state file.
///
/// Released when the handle is closed, including when the process dies.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    _file: File,
}

impl StateLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// JSON file holding a [`StateDocument`], replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Takes the exclusive lock without waiting.
    ///
    /// # Errors
    /// `LeaseUnavailable` when another handle, in this process or another,
    /// holds the lock.
    pub fn lock(&self) -> Result<StateLock> {
        fs::create_dir_all(self.parent()).map_err(|e| {
            UpgradeError::IoError(format!("Failed to create state directory: {}", e))
        })?;
        let path = self.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                UpgradeError::IoError(format!(
                    "Failed to open lock file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        match file.try_lock() {
            Ok(()) => Ok(StateLock { path, _file: file }),
            Err(TryLockError::WouldBlock) => Err(UpgradeError::LeaseUnavailable(format!(
                "state file '{}' is in use by another process",
                self.path.display()
            ))),
            Err(TryLockError::Error(e)) => Err(UpgradeError::IoError(format!(
                "Failed to lock '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    fn parent(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn load(&self) -> Result<Option<StateDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path).map_err(|e| {
            UpgradeError::IoError(format!(
                "Failed to open state file '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        let document = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            UpgradeError::SerializationError(format!(
                "Failed to parse state file '{}': {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(document))
    }

    /// Writes to a temporary file in the target directory, syncs it and renames
    /// it over the previous document.
    pub fn save(&self, document: &StateDocument) -> Result<()> {
        let parent = self.parent();
        fs::create_dir_all(&parent).map_err(|e| {
            UpgradeError::IoError(format!("Failed to create state directory: {}", e))
        })?;

        let temp = NamedTempFile::new_in(&parent)
            .map_err(|e| UpgradeError::IoError(format!("Failed to create temp file: {}", e)))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, document)?;
            writer
                .flush()
                .map_err(|e| UpgradeError::IoError(format!("Failed to flush state: {}", e)))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| UpgradeError::IoError(format!("Failed to sync state: {}", e)))?;
        temp.persist(&self.path).map_err(|e| {
            UpgradeError::IoError(format!("Failed to replace state file: {}", e.error))
        })?;
        Ok(())
    }
}
