//! Error types for the OpenAgent gateway client

use thiserror::Error;

/// Result type alias using the client's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway client
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A call was attempted while the connection was not open
    #[error("gateway not connected")]
    NotConnected,

    /// The connection dropped before a response arrived
    #[error("gateway closed: {0}")]
    ConnectionClosed(String),

    /// The gateway answered with `ok: false`
    #[error("{message}")]
    Rpc {
        /// Error message as sent by the gateway
        message: String,
        /// Optional machine-readable code
        code: Option<String>,
    },

    /// The `connect` handshake was refused
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// WebSocket / transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Another operation of the same kind is still in flight
    #[error("Busy: {0}")]
    Busy(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an RPC failure from a gateway error shape
    pub fn rpc(message: impl Into<String>, code: Option<String>) -> Self {
        Error::Rpc {
            message: message.into(),
            code,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::ConnectionClosed(_)
                | Error::Transport(_)
                | Error::Timeout(_)
        )
    }

    /// Check if the gateway itself rejected the request
    pub fn is_rpc(&self) -> bool {
        matches!(self, Error::Rpc { .. })
    }

    /// Error code of an RPC failure, if the gateway supplied one
    pub fn rpc_code(&self) -> Option<&str> {
        match self {
            Error::Rpc { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("Invalid gateway URL: {}", err))
    }
}
