//! Configuration paths
//!
//! Utilities for resolving configuration file paths.

use std::path::PathBuf;

/// Get the configuration directory
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("OPENAGENT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .map(|d| d.join("openagent"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".config").join("openagent"))
                .unwrap_or_else(|| PathBuf::from(".openagent"))
        })
}

/// Get the client configuration file path
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("OPENAGENT_CLIENT_CONFIG") {
        return PathBuf::from(path);
    }

    config_dir().join("client.json")
}
