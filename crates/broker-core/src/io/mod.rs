//! Atomic file I/O for the broker's on-disk state (spec §5, "Shared resource
//! policy": all state-file writes are atomic via temp-file + rename).

pub mod atomic;
pub mod error;
pub mod lock;

pub use atomic::{archive_move, is_staging_name, write_atomic, write_json_atomic};
pub use error::IoError;
pub use lock::{acquire_lock, FileLock};
