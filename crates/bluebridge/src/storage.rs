//! Durable blob storage
//!
//! The key store and the bridge configuration persist themselves as small
//! fixed-size files, always rewritten as a whole.

use log::debug;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Storage backend rejected write of {0}")]
    WriteRejected(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Named blob store
pub trait Storage: Send + Sync {
    /// Reads a whole blob; `Ok(None)` when it was never written.
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces a whole blob.
    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()>;
}

/// One file per blob under a data directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            name: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }
}

impl Storage for FileStorage {
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.root.join(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }

    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        // Write-then-rename keeps the previous blob intact on a torn write.
        let tmp = self.root.join(format!("{name}.tmp"));
        let io_err = |source| StorageError::Io {
            name: name.to_string(),
            source,
        };
        fs::write(&tmp, data).map_err(io_err)?;
        fs::rename(&tmp, self.root.join(name)).map_err(io_err)?;
        debug!("stored {} ({} bytes)", name, data.len());
        Ok(())
    }
}

/// In-memory backend, used by tests and for running without a data directory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }
}

impl Storage for MemoryStorage {
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned())
    }

    fn write(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected(name.to_string()));
        }
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }
}
