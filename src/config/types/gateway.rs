//! Gateway connection configuration
//!
//! Endpoint, credentials and timing used by the frame correlator.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Protocol version spoken by this client
pub const DEFAULT_PROTOCOL_VERSION: u32 = 3;

/// Gateway connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket endpoint
    #[serde(default = "default_url")]
    pub url: String,
    /// Shared access token
    #[serde(skip_serializing, default)]
    pub token: Option<SecretString>,
    /// Shared password
    #[serde(skip_serializing, default)]
    pub password: Option<SecretString>,
    /// Client identifier sent in the handshake
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Client version sent in the handshake
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// Client mode sent in the handshake (cli, webchat, ...)
    #[serde(default = "default_client_mode")]
    pub client_mode: String,
    /// Platform sent in the handshake
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Fixed delay before every reconnect attempt
    #[serde(default = "default_reconnect_delay", with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Optional per-call timeout; `None` waits until the response or a disconnect
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    /// Lowest protocol version accepted
    #[serde(default = "default_protocol")]
    pub min_protocol: u32,
    /// Highest protocol version accepted
    #[serde(default = "default_protocol")]
    pub max_protocol: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            url: default_url(),
            token: None,
            password: None,
            client_id: default_client_id(),
            client_version: default_client_version(),
            client_mode: default_client_mode(),
            platform: default_platform(),
            reconnect_delay: default_reconnect_delay(),
            request_timeout: None,
            min_protocol: default_protocol(),
            max_protocol: default_protocol(),
        }
    }
}

impl GatewayConfig {
    /// Config pointing at a specific endpoint, everything else default
    pub fn with_url(url: impl Into<String>) -> Self {
        GatewayConfig {
            url: url.into(),
            ..Default::default()
        }
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:18789".to_string()
}

fn default_client_id() -> String {
    "openagent-client".to_string()
}

fn default_client_version() -> String {
    crate::VERSION.to_string()
}

fn default_client_mode() -> String {
    "cli".to_string()
}

fn default_platform() -> String {
    std::env::consts::OS.to_string()
}

fn default_reconnect_delay() -> Duration {
    Duration::from_millis(800)
}

fn default_protocol() -> u32 {
    DEFAULT_PROTOCOL_VERSION
}
