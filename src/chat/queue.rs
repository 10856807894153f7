//! Outbound message queue
//!
//! Messages composed while a run is active wait here. The coordinator drains
//! the queue one item at a time, and only while the session is idle. A failed
//! send puts its item back at the head so it keeps its place.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A message waiting for the active run to finish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    /// Trimmed text
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// FIFO of deferred sends for one session
#[derive(Debug, Clone, Default)]
pub struct OutboundQueue {
    items: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Blank text is ignored.
    pub fn enqueue(&mut self, text: &str) -> Option<&QueuedMessage> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.items.push_back(QueuedMessage {
            id: uuid::Uuid::new_v4().to_string(),
            text: trimmed.to_string(),
            created_at: Utc::now(),
        });
        self.items.back()
    }

    /// Take the head item for sending
    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.items.pop_front()
    }

    /// Put back an item whose send failed
    pub fn push_front(&mut self, item: QueuedMessage) {
        self.items.push_front(item);
    }

    /// Drop a not-yet-sent item. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        self.items.len() != before
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }

    /// Copy of the items, head first
    pub fn to_vec(&self) -> Vec<QueuedMessage> {
        self.items.iter().cloned().collect()
    }
}
