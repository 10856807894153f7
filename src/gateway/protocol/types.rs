//! Gateway protocol types
//!
//! Typed params and payloads for the methods and events the client runtime
//! consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Method and event names
// ============================================================================

/// Method names
pub mod methods {
    /// Handshake, once per connection
    pub const CONNECT: &str = "connect";
    /// Start a chat run
    pub const CHAT_SEND: &str = "chat.send";
    /// Ask the gateway to abort a chat run
    pub const CHAT_ABORT: &str = "chat.abort";
    /// Fetch past chat messages
    pub const CHAT_HISTORY: &str = "chat.history";
    /// Answer an exec approval prompt
    pub const EXEC_APPROVAL_RESOLVE: &str = "exec.approval.resolve";
}

/// Event names
pub mod events {
    /// Chat run progress (delta, final, aborted, error)
    pub const CHAT: &str = "chat";
    /// A command is waiting for approval
    pub const EXEC_APPROVAL_REQUESTED: &str = "exec.approval.requested";
    /// An approval was decided (possibly by another client)
    pub const EXEC_APPROVAL_RESOLVED: &str = "exec.approval.resolved";
}

// ============================================================================
// Handshake
// ============================================================================

/// Params of the `connect` handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest protocol version the client speaks
    pub min_protocol: u32,
    /// Highest protocol version the client speaks
    pub max_protocol: u32,
    /// Who is connecting
    pub client: ClientInfo,
    /// Credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
}

/// Client identity descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client identifier
    pub id: String,
    /// Client version
    pub version: String,
    /// Operating system / platform
    pub platform: String,
    /// Client mode (cli, webchat, ...)
    pub mode: String,
    /// Per-process instance id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Handshake credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAuth {
    /// Shared token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shared password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

// ============================================================================
// Chat
// ============================================================================

/// Params of `chat.send`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendParams {
    /// Session the message belongs to
    pub session_key: String,
    /// Message text
    pub message: String,
    /// Whether the gateway should also deliver the reply to an outer channel
    pub deliver: bool,
    /// Run identifier, doubles as idempotency key
    pub idempotency_key: String,
    /// Encoded attachments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentPayload>>,
}

/// Wire form of an attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    /// Always "file"
    #[serde(rename = "type")]
    pub kind: String,
    /// MIME type
    pub mime_type: String,
    /// Original file name
    pub file_name: String,
    /// Base64 content
    pub content: String,
}

/// Params of `chat.abort`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAbortParams {
    /// Session to abort
    pub session_key: String,
    /// Run to abort, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Params of `chat.history`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryParams {
    /// Session to read
    pub session_key: String,
    /// Maximum number of messages
    pub limit: u32,
}

/// Payload returned by `chat.history`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryResponse {
    /// Past messages, oldest first
    #[serde(default)]
    pub messages: Vec<Value>,
    /// Thinking level of the session
    #[serde(default)]
    pub thinking_level: Option<String>,
}

/// State carried by a `chat` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatEventState {
    /// Streamed partial text
    Delta,
    /// Run finished
    Final,
    /// Run aborted
    Aborted,
    /// Run failed
    Error,
}

impl ChatEventState {
    /// Whether the run is over
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChatEventState::Delta)
    }
}

/// Payload of a `chat` event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEventPayload {
    /// Run the event belongs to
    #[serde(default)]
    pub run_id: Option<String>,
    /// Session the event belongs to
    pub session_key: String,
    /// Run state
    pub state: ChatEventState,
    /// Message (partial for delta, complete for final)
    #[serde(default)]
    pub message: Option<Value>,
    /// Error text for `error`
    #[serde(default)]
    pub error_message: Option<String>,
}

// ============================================================================
// Exec approvals
// ============================================================================

/// Payload of `exec.approval.requested`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecApprovalRequestedPayload {
    /// Approval id
    pub id: String,
    /// What is being asked
    pub request: ExecApprovalRequestInfo,
    /// Creation time, unix millis
    #[serde(default)]
    pub created_at_ms: Option<i64>,
    /// Expiry time, unix millis
    pub expires_at_ms: i64,
}

/// Command details of an approval prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecApprovalRequestInfo {
    /// Command line
    pub command: String,
    /// Working directory
    #[serde(default)]
    pub cwd: Option<String>,
    /// Execution host (gateway, node, sandbox)
    #[serde(default)]
    pub host: Option<String>,
    /// Security mode
    #[serde(default)]
    pub security: Option<String>,
    /// Confirmation policy
    #[serde(default)]
    pub ask: Option<String>,
    /// Agent that wants to run the command
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Resolved executable path
    #[serde(default)]
    pub resolved_path: Option<String>,
    /// Session the command runs for
    #[serde(default)]
    pub session_key: Option<String>,
}

/// Params of `exec.approval.resolve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecApprovalResolveParams {
    /// Approval id
    pub id: String,
    /// Decision wire value
    pub decision: String,
}

/// Payload of `exec.approval.resolved`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecApprovalResolvedPayload {
    /// Approval id
    pub id: String,
    /// Decision taken
    #[serde(default)]
    pub decision: Option<String>,
    /// Who decided
    #[serde(default)]
    pub resolved_by: Option<String>,
}
