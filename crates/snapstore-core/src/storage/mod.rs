//! Storage layer
//!
//! The byte-level backing file and the error taxonomy shared across the
//! crate. One file per document identity; writes go through an atomic
//! temp-file-and-rename so readers never observe a torn file.

pub mod error;
pub mod persistence;

pub use error::{StoreError, StoreResult};
pub use persistence::FilePersistence;
