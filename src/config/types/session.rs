//! Chat and exec-approval configuration

use serde::{Deserialize, Serialize};

/// Chat session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Session key the chat coordinator binds to
    #[serde(default = "default_session_key")]
    pub session_key: String,
    /// Number of messages requested by `chat.history`
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            session_key: default_session_key(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_session_key() -> String {
    "main".to_string()
}

fn default_history_limit() -> u32 {
    200
}

/// Exec approval configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    /// Drop already-expired prompts whenever a new one arrives.
    /// Expired prompts are never auto-denied.
    #[serde(default)]
    pub prune_expired: bool,
}
