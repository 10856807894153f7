//! Per-session chat run state
//!
//! Pure state transitions for one conversational turn. The coordinator owns
//! one [`ChatRunState`] and is the only thing that mutates it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::message::{extract_text, Attachment, ChatMessage};
use crate::gateway::protocol::{ChatEventPayload, ChatEventState};

/// Observable phase of the session's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// No run in flight
    Idle,
    /// `chat.send` issued, not yet acknowledged
    Sending,
    /// Acknowledged, waiting for deltas and a terminal event
    Streaming,
}

/// Error recorded when a disconnect ends an acknowledged run
const DISCONNECTED: &str = "gateway disconnected";

/// Chat state of one session
#[derive(Debug, Clone)]
pub struct ChatRunState {
    pub session_key: String,
    pub draft: String,
    /// Files staged for the next send
    pub attachments: Vec<Attachment>,
    /// Active run id, also the idempotency key of its `chat.send`
    pub run_id: Option<String>,
    /// Text streamed so far
    pub stream: Option<String>,
    pub stream_started_at: Option<DateTime<Utc>>,
    pub sending: bool,
    pub last_error: Option<String>,
    pub history: Vec<ChatMessage>,
    pub thinking_level: Option<String>,
}

impl ChatRunState {
    pub fn new(session_key: impl Into<String>) -> Self {
        ChatRunState {
            session_key: session_key.into(),
            draft: String::new(),
            attachments: Vec::new(),
            run_id: None,
            stream: None,
            stream_started_at: None,
            sending: false,
            last_error: None,
            history: Vec::new(),
            thinking_level: None,
        }
    }

    /// A send is in flight or a run is active
    pub fn is_busy(&self) -> bool {
        self.sending || self.run_id.is_some()
    }

    pub fn phase(&self) -> RunPhase {
        if self.sending {
            RunPhase::Sending
        } else if self.run_id.is_some() {
            RunPhase::Streaming
        } else {
            RunPhase::Idle
        }
    }

    /// Start a run: record the user entry and mint a run id
    pub fn begin_run(&mut self, text: &str, attachments: &[Attachment]) -> String {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.history.push(ChatMessage::user(text, attachments));
        self.sending = true;
        self.last_error = None;
        self.run_id = Some(run_id.clone());
        self.stream = Some(String::new());
        self.stream_started_at = Some(Utc::now());
        run_id
    }

    /// The gateway accepted `chat.send`
    pub fn send_acknowledged(&mut self) {
        self.sending = false;
    }

    /// The gateway rejected `chat.send` (or it never arrived)
    pub fn send_failed(&mut self, run_id: &str, reason: &str) {
        self.sending = false;
        if self.run_id.as_deref().map_or(false, |active| active != run_id) {
            debug!(run_id, "Ignoring failure of a superseded send");
            return;
        }
        self.clear_run();
        self.last_error = Some(reason.to_string());
        self.history.push(ChatMessage::error(reason));
    }

    /// Apply a `chat` event. Returns its state when it was accepted.
    pub fn apply_event(&mut self, event: &ChatEventPayload) -> Option<ChatEventState> {
        if event.session_key != self.session_key {
            return None;
        }
        if let (Some(incoming), Some(active)) = (event.run_id.as_deref(), self.run_id.as_deref()) {
            if incoming != active {
                debug!(incoming, active, "Ignoring chat event for another run");
                return None;
            }
        }

        match event.state {
            ChatEventState::Delta => {
                if let Some(next) = event.message.as_ref().and_then(extract_text) {
                    self.accept_delta(next);
                }
                if self.stream_started_at.is_none() {
                    self.stream_started_at = Some(Utc::now());
                }
            }
            ChatEventState::Final => {
                if let Some(message) = event.message.as_ref().and_then(ChatMessage::from_value) {
                    self.history.push(message);
                }
                self.clear_run();
            }
            ChatEventState::Aborted => self.clear_run(),
            ChatEventState::Error => {
                self.clear_run();
                self.last_error = Some(
                    event
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "chat error".to_string()),
                );
            }
        }

        Some(event.state)
    }

    /// The connection dropped. An acknowledged run can no longer finish, so
    /// it is cleared; an unacknowledged send is rolled back when its request
    /// is rejected.
    pub fn disconnected(&mut self) -> bool {
        if self.sending || self.run_id.is_none() {
            return false;
        }
        self.clear_run();
        self.last_error = Some(DISCONNECTED.to_string());
        true
    }

    /// Replace history with what `chat.history` returned
    pub fn set_history(&mut self, messages: &[Value], thinking_level: Option<String>) {
        self.history = messages.iter().filter_map(ChatMessage::from_value).collect();
        if self.history.len() != messages.len() {
            debug!(
                skipped = messages.len() - self.history.len(),
                "Skipped unreadable history entries"
            );
        }
        self.thinking_level = thinking_level;
    }

    /// Accept a delta only if it does not shrink the visible stream
    fn accept_delta(&mut self, next: String) {
        let current_len = self.stream.as_deref().map_or(0, |s| s.chars().count());
        if current_len == 0 || next.chars().count() >= current_len {
            self.stream = Some(next);
        }
    }

    fn clear_run(&mut self) {
        self.stream = None;
        self.run_id = None;
        self.stream_started_at = None;
    }
}
