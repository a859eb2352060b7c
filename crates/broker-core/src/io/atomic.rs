//! Atomic file writes and archival moves.
//!
//! The spool-as-queue design (spec §9) hinges on rename being the only
//! commit primitive: every daemon-owned file (agent records, the
//! session→agent map, the oriented-set, thread records, status, metrics) is
//! written to a sibling temp path and renamed into place, and every spool
//! message is moved into `messages/archive/` by rename rather than
//! copy-then-delete. Both directions need the destination directory to
//! exist and both need to live on the same filesystem for the rename to be
//! atomic (spec §5, "Shared resource policy").

use crate::io::error::IoError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Write `bytes` to `path` atomically: write to `path.tmp.<pid>`, then
/// rename over `path`. Creates the parent directory if missing.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| IoError::Io {
        path: parent.to_path_buf(),
        source,
    })?;

    let tmp_path = temp_sibling(path);
    std::fs::write(&tmp_path, bytes).map_err(|source| IoError::Io {
        path: tmp_path.clone(),
        source,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|source| IoError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), IoError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| IoError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &json)
}

/// Move `from` into `to` by rename, creating `to`'s parent directory if
/// missing. Used to move spool messages into `messages/archive/`.
pub fn archive_move(from: &Path, to: &Path) -> Result<(), IoError> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|source| IoError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::rename(from, to).map_err(|source| IoError::Io {
        path: from.to_path_buf(),
        source,
    })
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{file_name}.tmp.{}", std::process::id()))
}

/// Whether `name` is a dot-prefixed staging name that the watcher should
/// ignore (spec §9: producers stage under a dot-prefixed name and rename).
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with('.')
}
