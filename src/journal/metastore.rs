//! Persistent journal metadata.
//!
//! The metastore remembers the highest index known to be on stable storage.
//! Recovery uses it to tell torn, never-flushed records (which may be
//! discarded) apart from corrupted flushed data (which must stop startup).

use super::error::JournalError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Storage for journal bookkeeping that must survive restarts.
pub trait JournalMetaStore: Send + Sync + std::fmt::Debug {
    /// Remember that every record up to and including `index` is durable.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::MetaStore`] if the value cannot be persisted.
    fn store_last_flushed_index(&self, index: u64) -> Result<(), JournalError>;

    /// The last stored flushed index, if any.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::MetaStore`] if the stored value is unreadable.
    fn load_last_flushed_index(&self) -> Result<Option<u64>, JournalError>;

    /// Forget the flushed index (the journal was reset).
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::MetaStore`] if the value cannot be removed.
    fn reset_last_flushed_index(&self) -> Result<(), JournalError>;
}

/// Metastore that keeps everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetaStore {
    last_flushed_index: Mutex<Option<u64>>,
}

impl InMemoryMetaStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JournalMetaStore for InMemoryMetaStore {
    fn store_last_flushed_index(&self, index: u64) -> Result<(), JournalError> {
        let mut guard = self
            .last_flushed_index
            .lock()
            .map_err(|_| JournalError::LockPoisoned)?;
        *guard = Some(index);
        Ok(())
    }

    fn load_last_flushed_index(&self) -> Result<Option<u64>, JournalError> {
        self.last_flushed_index
            .lock()
            .map(|guard| *guard)
            .map_err(|_| JournalError::LockPoisoned)
    }

    fn reset_last_flushed_index(&self) -> Result<(), JournalError> {
        let mut guard = self
            .last_flushed_index
            .lock()
            .map_err(|_| JournalError::LockPoisoned)?;
        *guard = None;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetaDocument {
    last_flushed_index: Option<u64>,
}

/// Metastore backed by a small JSON file.
///
/// Every update writes a temporary file, syncs it and renames it over the
/// previous document, so a crash leaves either the old or the new value.
#[derive(Debug)]
pub struct FileMetaStore {
    path: PathBuf,
    // serializes writers of the document
    lock: Mutex<()>,
}

impl FileMetaStore {
    /// Use (or create on first write) the document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Conventional location inside a journal directory: `{name}.meta`.
    pub fn in_directory(directory: &Path, name: &str) -> Self {
        Self::new(directory.join(format!("{name}.meta")))
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<MetaDocument, JournalError> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| JournalError::MetaStore {
                message: format!("invalid metastore {}: {e}", self.path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MetaDocument::default()),
            Err(e) => Err(JournalError::MetaStore {
                message: format!("failed to read {}: {e}", self.path.display()),
            }),
        }
    }

    fn write(&self, document: &MetaDocument) -> Result<(), JournalError> {
        let _guard = self.lock.lock().map_err(|_| JournalError::LockPoisoned)?;
        let meta_err = |e: std::io::Error| JournalError::MetaStore {
            message: format!("failed to write {}: {e}", self.path.display()),
        };

        let bytes = serde_json::to_vec(document).map_err(|e| JournalError::MetaStore {
            message: e.to_string(),
        })?;

        let tmp = self.path.with_extension("meta.tmp");
        let mut file = File::create(&tmp).map_err(meta_err)?;
        file.write_all(&bytes).map_err(meta_err)?;
        file.sync_all().map_err(meta_err)?;
        fs::rename(&tmp, &self.path).map_err(meta_err)
    }
}

impl JournalMetaStore for FileMetaStore {
    fn store_last_flushed_index(&self, index: u64) -> Result<(), JournalError> {
        self.write(&MetaDocument {
            last_flushed_index: Some(index),
        })
    }

    fn load_last_flushed_index(&self) -> Result<Option<u64>, JournalError> {
        Ok(self.read()?.last_flushed_index)
    }

    fn reset_last_flushed_index(&self) -> Result<(), JournalError> {
        self.write(&MetaDocument::default())
    }
}
