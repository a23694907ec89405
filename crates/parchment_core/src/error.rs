//! Unified error type for the note store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the update store, codec, CRDT adapter, and sync manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// General I/O failure from the filesystem capability.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A packed or meta file failed to parse as JSON.
    #[error("Failed to parse '{path}': {source}")]
    Json {
        /// Path of the file that failed to parse.
        path: PathBuf,
        /// Underlying serde_json error.
        source: serde_json::Error,
    },

    /// A packed file's `updates` array length did not match its sequence range,
    /// or its range was otherwise malformed (`endSeq < startSeq`).
    #[error("Invariant violation in '{path}': {message}")]
    InvariantViolation {
        /// Path of the offending packed file.
        path: PathBuf,
        /// Description of what's wrong.
        message: String,
    },

    /// A CRDT operation (decode/apply/encode) failed.
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// Base64 decoding of an update failed.
    #[error("Failed to decode update: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Operation attempted on a note whose store state has been removed.
    #[error("Note '{0}' is not initialized in the update store")]
    NotInitialized(String),

    /// Operation attempted after `cleanup`/`destroy` has already run.
    #[error("Operation attempted on a destroyed store")]
    Destroyed,
}

/// Result type alias for note-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
