//! Store error handling
//!
//! Typed errors for store operations. Synchronous entry points (opening a
//! store, file-only reads, explicit flushes) surface these to the caller.
//! Background paths (debounced flushes, the initial cache load, replay
//! reads) log them and keep going: the in-memory snapshot stays
//! authoritative and a later successful write overwrites whatever is on
//! disk.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::StorageArea;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// The platform directory backing a storage area could not be resolved
    #[error("Cannot resolve a platform directory for the '{area}' storage area. Set an explicit data_dir.")]
    PathResolution { area: StorageArea },

    /// Configuration could not be parsed
    #[error("Invalid configuration: {details}")]
    Config { details: String },

    /// Stored bytes could not be decoded into the record type
    #[error("Failed to decode stored records: {details}")]
    Decode { details: String },

    /// Records could not be encoded for persistence
    #[error("Failed to encode records: {details}")]
    Encode { details: String },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error("Disk full or quota exceeded while writing to '{path}'.")]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read the backing file
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write the backing file
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The store has been closed; its background writer is gone
    #[error("Store is closed")]
    Closed,

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Classify a write-side I/O error with path context
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                path,
                source: error,
            },
            // StorageFull is not stable on all platforms; fall back to the
            // error message.
            _ if is_disk_full_error(&error) => StoreError::DiskFull {
                path,
                source: error,
            },
            _ => StoreError::Write {
                path,
                source: error,
            },
        }
    }
}

/// Check if an I/O error indicates a disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
