//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use super::types::Config;
use crate::error::{Error, Result};

/// A snapshot of the configuration file
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Path to the config file
    pub path: std::path::PathBuf,
    /// Whether the file exists
    pub exists: bool,
    /// Raw file content
    pub raw: Option<String>,
    /// Parsed configuration
    pub config: Option<Config>,
    /// Problems found while reading or parsing
    pub issues: Vec<String>,
}

/// Load configuration with layered precedence:
/// 1. Config file if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    load_config_with_path(&super::paths::config_path())
}

/// Same as [`load_config`] with an explicit file location
pub fn load_config_with_path(config_path: &Path) -> Result<Config> {
    let mut config = if config_path.exists() {
        load_config_from_path(config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    parse_config(path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<Config> {
    let config: Config = if path.extension().map_or(false, |ext| ext == "json") {
        json5::from_str(content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().map_or(false, |ext| ext == "toml") {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        json5::from_str(content)
            .or_else(|_| toml::from_str(content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variables. Env vars have
/// the highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();

    if let Ok(url) = std::env::var("OPENAGENT_GATEWAY_URL") {
        config.gateway.url = url;
    }
    if let Ok(token) = std::env::var("OPENAGENT_GATEWAY_TOKEN") {
        if !token.is_empty() {
            config.gateway.token = Some(SecretString::from(token));
        }
    }
    if let Ok(password) = std::env::var("OPENAGENT_GATEWAY_PASSWORD") {
        if !password.is_empty() {
            config.gateway.password = Some(SecretString::from(password));
        }
    }
    if let Ok(delay) = std::env::var("OPENAGENT_RECONNECT_DELAY_MS") {
        if let Ok(ms) = delay.parse() {
            config.gateway.reconnect_delay = Duration::from_millis(ms);
        }
    }
    if let Ok(timeout) = std::env::var("OPENAGENT_REQUEST_TIMEOUT_MS") {
        match timeout.parse::<u64>() {
            Ok(0) => config.gateway.request_timeout = None,
            Ok(ms) => config.gateway.request_timeout = Some(Duration::from_millis(ms)),
            Err(_) => {}
        }
    }

    if let Ok(session_key) = std::env::var("OPENAGENT_SESSION_KEY") {
        config.chat.session_key = session_key;
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        config.log.level = level;
    }
    if let Ok(format) = std::env::var("LOG_FORMAT") {
        if let Ok(format) = format.parse() {
            config.log.format = format;
        }
    }
}

/// Save configuration to a file. Secrets are never written.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().map_or(false, |ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}

/// Read a configuration file into a snapshot
pub fn read_config_snapshot(path: &Path) -> ConfigSnapshot {
    if !path.exists() {
        return ConfigSnapshot {
            path: path.to_path_buf(),
            exists: false,
            raw: None,
            config: None,
            issues: vec!["Configuration file does not exist".to_string()],
        };
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return ConfigSnapshot {
                path: path.to_path_buf(),
                exists: true,
                raw: None,
                config: None,
                issues: vec![format!("Failed to read file: {}", e)],
            };
        }
    };

    match parse_config(path, &raw) {
        Ok(config) => ConfigSnapshot {
            path: path.to_path_buf(),
            exists: true,
            raw: Some(raw),
            config: Some(config),
            issues: Vec::new(),
        },
        Err(e) => ConfigSnapshot {
            path: path.to_path_buf(),
            exists: true,
            raw: Some(raw),
            config: None,
            issues: vec![format!("Failed to parse config: {}", e)],
        },
    }
}
