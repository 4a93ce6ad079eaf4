//! Backing-file persistence
//!
//! Byte-level read/write of a store's single backing file. Writes are
//! atomic (write to a temp file in the same directory, sync, then rename)
//! so the file is never observed in a partially-written state. Encoding
//! records into bytes is the codec's job; this layer only moves bytes.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::storage::{StoreError, StoreResult};

/// Byte-level backend for one document file
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The resolved backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the backing file exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the backing file
    ///
    /// Returns `None` if the file doesn't exist yet; a first read before any
    /// flush is an empty collection, not an error.
    pub fn load(&self) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Read {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Atomically replace the backing file with `bytes`
    pub fn save(&self, bytes: &[u8]) -> StoreResult<()> {
        atomic_write(&self.path, bytes)
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
///
/// This ensures the target file is never left in a partially-written state.
fn atomic_write(path: &Path, data: &[u8]) -> StoreResult<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::from_io(e, parent.to_path_buf()))?;
    }

    // Create temp file in the same directory (for atomic rename)
    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StoreError::from_io(e, temp_path.clone()))?;

    file.write_all(data)
        .map_err(|e| StoreError::from_io(e, temp_path.clone()))?;

    // Sync to disk before rename
    file.sync_all()
        .map_err(|e| StoreError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|e| StoreError::from_io(e, path.to_path_buf()))?;

    Ok(())
}
