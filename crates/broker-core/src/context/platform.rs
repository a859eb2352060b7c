//! Platform detection

use serde::{Deserialize, Serialize};

/// Operating system platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// macOS (Darwin)
    MacOS,
    /// Linux
    Linux,
    /// Windows
    Windows,
}

impl Platform {
    /// Detect the current platform
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOS,
            "linux" => Platform::Linux,
            "windows" => Platform::Windows,
            os => {
                // Default to Linux for unknown Unix-like systems
                eprintln!("Warning: Unknown OS '{os}', defaulting to Linux");
                Platform::Linux
            }
        }
    }
}
