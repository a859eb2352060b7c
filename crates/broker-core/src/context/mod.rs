//! System context detection.
//!
//! This module provides runtime context about the host the daemon is
//! running on. All detection is local (no network calls).

mod platform;
mod system;

pub use platform::Platform;
pub use system::SystemContext;
