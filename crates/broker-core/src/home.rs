//! Canonical home directory resolution for the broker.
//!
//! Provides a single source of truth for locating the broker's state
//! directory across all broker crates, with consistent behavior on all
//! platforms (Linux, macOS, Windows) and support for custom deployments and
//! testing via the `BROKER_HOME` environment variable.
//!
//! # Platform Behavior
//!
//! - **Linux/macOS**: `dirs::data_local_dir()` honors `$XDG_DATA_HOME`/`$HOME`.
//! - **Windows**: `dirs::data_local_dir()` uses the Windows API, which ignores
//!   both `HOME` and `USERPROFILE`.
//!
//! # Precedence
//!
//! 1. `BROKER_HOME` environment variable (if set and non-empty)
//! 2. `dirs::data_local_dir()/agent-broker` platform default
//!
//! # Usage
//!
//! ```
//! use broker_core::home::get_home_dir;
//!
//! # fn example() -> anyhow::Result<()> {
//! let home = get_home_dir()?;
//! let agents_dir = home.join("agents");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! # Testing
//!
//! Integration tests MUST use `BROKER_HOME` to override the state directory:
//!
//! ```ignore
//! use tempfile::TempDir;
//!
//! let temp_dir = TempDir::new().unwrap();
//! unsafe { std::env::set_var("BROKER_HOME", temp_dir.path()) };
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the broker's home (state) directory.
///
/// # Precedence
///
/// 1. `BROKER_HOME` environment variable (if set and non-empty)
/// 2. `dirs::data_local_dir()/agent-broker` platform default
///
/// # Errors
///
/// Returns an error if `BROKER_HOME` is not set and the platform's local
/// data directory cannot be determined via `dirs::data_local_dir()`.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("BROKER_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::data_local_dir()
        .map(|d| d.join("agent-broker"))
        .context("Could not determine broker home directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn platform_default() -> PathBuf {
        dirs::data_local_dir().unwrap().join("agent-broker")
    }

    #[test]
    #[serial]
    fn test_broker_home_set() {
        let original = env::var("BROKER_HOME").ok();
        unsafe { env::set_var("BROKER_HOME", "/custom/home") };

        let home = get_home_dir().unwrap();
        assert_eq!(home, PathBuf::from("/custom/home"));

        unsafe {
            match original {
                Some(v) => env::set_var("BROKER_HOME", v),
                None => env::remove_var("BROKER_HOME"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_broker_home_not_set_uses_platform_default() {
        let original = env::var("BROKER_HOME").ok();
        unsafe { env::remove_var("BROKER_HOME") };

        let home = get_home_dir().unwrap();
        assert_eq!(home, platform_default());

        unsafe {
            if let Some(v) = original {
                env::set_var("BROKER_HOME", v);
            }
        }
    }

    #[test]
    #[serial]
    fn test_broker_home_empty_string_uses_platform_default() {
        let original = env::var("BROKER_HOME").ok();
        unsafe { env::set_var("BROKER_HOME", "") };

        let home = get_home_dir().unwrap();
        assert_eq!(home, platform_default());

        unsafe {
            match original {
                Some(v) => env::set_var("BROKER_HOME", v),
                None => env::remove_var("BROKER_HOME"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_broker_home_whitespace_only_uses_platform_default() {
        let original = env::var("BROKER_HOME").ok();
        unsafe { env::set_var("BROKER_HOME", "   ") };

        let home = get_home_dir().unwrap();
        assert_eq!(home, platform_default());

        unsafe {
            match original {
                Some(v) => env::set_var("BROKER_HOME", v),
                None => env::remove_var("BROKER_HOME"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_broker_home_with_leading_trailing_whitespace() {
        let original = env::var("BROKER_HOME").ok();
        unsafe { env::set_var("BROKER_HOME", "  /custom/home  ") };

        let home = get_home_dir().unwrap();
        assert_eq!(home, PathBuf::from("/custom/home"));

        unsafe {
            match original {
                Some(v) => env::set_var("BROKER_HOME", v),
                None => env::remove_var("BROKER_HOME"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_multiple_calls_consistent() {
        let original = env::var("BROKER_HOME").ok();
        unsafe { env::set_var("BROKER_HOME", "/test/home") };

        let home1 = get_home_dir().unwrap();
        let home2 = get_home_dir().unwrap();
        assert_eq!(home1, home2);

        unsafe {
            match original {
                Some(v) => env::set_var("BROKER_HOME", v),
                None => env::remove_var("BROKER_HOME"),
            }
        }
    }
}
