//! File locking with backoff retry

use crate::io::error::IoError;
use fs2::FileExt;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// File lock guard that automatically releases on drop
pub struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Release the lock - fs2 handles platform-specific unlock
        // Use fully qualified syntax to avoid unstable name collision warning
        let _ = FileExt::unlock(&self.file);
    }
}

/// Acquire an exclusive lock on a file with backoff retry
///
/// Attempts to acquire a lock with exponential backoff:
/// - Attempt 0: No wait
/// - Attempt 1: 50ms wait
/// - Attempt 2: 100ms wait
/// - Attempt 3: 200ms wait
/// - Attempt 4: 400ms wait
/// - Attempt 5: 800ms wait
///
/// # Arguments
///
/// * `path` - Path to the file to lock
/// * `max_retries` - Maximum number of retry attempts (default: 5)
///
/// # Returns
///
/// Returns a `FileLock` guard that automatically releases the lock on drop.
/// Returns `IoError::LockTimeout` if unable to acquire lock after all retries.
///
/// # Implementation
///
/// Uses the `fs2` crate for cross-platform file locking:
/// - Unix: flock()
/// - Windows: LockFileEx()
pub fn acquire_lock(path: &Path, max_retries: u32) -> Result<FileLock, IoError> {
    use std::fs::OpenOptions;

    // Open (or create) the lock file
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| IoError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

    // Try to acquire lock with exponential backoff
    for attempt in 0..=max_retries {
        match file.try_lock_exclusive() {
            Ok(()) => {
                // Lock acquired successfully
                return Ok(FileLock { file });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // Someone else has the lock, retry with backoff
                if attempt < max_retries {
                    // Exponential backoff: 50ms, 100ms, 200ms, 400ms, 800ms
                    let wait_ms = 50u64 * (1 << attempt);
                    std::thread::sleep(Duration::from_millis(wait_ms));
                }
            }
            Err(e) => {
                // Some other error occurred
                return Err(IoError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
    }

    Err(IoError::LockTimeout {
        path: path.to_path_buf(),
        retries: max_retries,
    })
}
