//! Error types for broker file I/O.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the atomic file-write and archive helpers in [`super::atomic`].
#[derive(Error, Debug)]
pub enum IoError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to acquire lock on {path} after {retries} retries")]
    LockTimeout { path: PathBuf, retries: u32 },
}
