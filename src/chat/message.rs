//! Chat history entries and attachments

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::gateway::protocol::AttachmentPayload;

/// MIME type sent when an attachment has none
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// One entry of the visible chat history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user", "assistant", "tool", ...
    pub role: String,
    #[serde(default, deserialize_with = "deserialize_content")]
    pub content: Vec<ContentBlock>,
    /// Unix millis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A block of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    File {
        name: String,
        size: u64,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Block kinds this client does not render (images, tool calls, ...)
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

fn deserialize_content<'de, D>(deserializer: D) -> std::result::Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawContent>::deserialize(deserializer)? {
        Some(RawContent::Text(text)) => vec![ContentBlock::Text { text }],
        Some(RawContent::Blocks(blocks)) => blocks,
        None => Vec::new(),
    })
}

impl ChatMessage {
    /// Build a message stamped with the current time
    pub fn new(role: impl Into<String>, content: Vec<ContentBlock>) -> Self {
        ChatMessage {
            role: role.into(),
            content,
            timestamp: Some(Utc::now().timestamp_millis()),
        }
    }

    /// User entry for an outgoing message
    pub fn user(text: &str, attachments: &[Attachment]) -> Self {
        let mut content = Vec::with_capacity(attachments.len() + 1);
        if !text.is_empty() {
            content.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        content.extend(attachments.iter().map(Attachment::content_block));
        ChatMessage::new("user", content)
    }

    /// Assistant entry reporting a failed send
    pub fn error(reason: &str) -> Self {
        ChatMessage::new(
            "assistant",
            vec![ContentBlock::Text {
                text: format!("Error: {}", reason),
            }],
        )
    }

    /// Parse a gateway message object
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Extract the plain text of a gateway message.
///
/// Accepts a bare string, an object with a `text` field, or an object whose
/// `content` is a string or an array of blocks (text blocks are joined with
/// newlines). Returns `None` when no text can be found.
pub fn extract_text(message: &Value) -> Option<String> {
    match message {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                return Some(text.clone());
            }
            match map.get("content")? {
                Value::String(text) => Some(text.clone()),
                Value::Array(blocks) => {
                    let parts: Vec<&str> = blocks
                        .iter()
                        .filter(|block| {
                            block.get("type").and_then(Value::as_str).unwrap_or("text") == "text"
                        })
                        .filter_map(|block| block.get("text").and_then(Value::as_str))
                        .collect();
                    if parts.is_empty() {
                        None
                    } else {
                        Some(parts.join("\n"))
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// A file staged for sending
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, mime_type: Option<String>, data: Vec<u8>) -> Self {
        Attachment {
            file_name: file_name.into(),
            mime_type,
            data,
        }
    }

    /// Read a file from disk, guessing the MIME type from its extension
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let mime_type = mime_guess::from_path(path).first_raw().map(str::to_string);
        Ok(Attachment::new(file_name, mime_type, data))
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// History block describing this attachment
    pub fn content_block(&self) -> ContentBlock {
        ContentBlock::File {
            name: self.file_name.clone(),
            size: self.size(),
            mime_type: self.mime_type.clone(),
        }
    }

    /// Wire form with base64 content
    pub fn to_payload(&self) -> AttachmentPayload {
        AttachmentPayload {
            kind: "file".to_string(),
            mime_type: self
                .mime_type
                .clone()
                .filter(|mime| !mime.is_empty())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            file_name: self.file_name.clone(),
            content: STANDARD.encode(&self.data),
        }
    }
}
