//! Exec approval queue
//!
//! FIFO of pending command approvals. Only the head is presented; decisions
//! always target it. Expiry is informational: nothing here denies or drops
//! a prompt because its time ran out, unless pruning is asked for.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::gateway::protocol::{ExecApprovalRequestInfo, ExecApprovalRequestedPayload};

/// A command waiting for a human decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecApprovalRequest {
    pub id: String,
    pub command: String,
    pub cwd: Option<String>,
    /// Execution host (gateway, node, sandbox)
    pub host: Option<String>,
    pub security: Option<String>,
    /// Confirmation policy
    pub ask: Option<String>,
    pub agent_id: Option<String>,
    pub session_key: Option<String>,
    pub resolved_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl ExecApprovalRequest {
    /// Milliseconds until expiry, negative once expired
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_milliseconds()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl From<ExecApprovalRequestedPayload> for ExecApprovalRequest {
    fn from(payload: ExecApprovalRequestedPayload) -> Self {
        let ExecApprovalRequestInfo {
            command,
            cwd,
            host,
            security,
            ask,
            agent_id,
            resolved_path,
            session_key,
        } = payload.request;
        ExecApprovalRequest {
            id: payload.id,
            command,
            cwd,
            host,
            security,
            ask,
            agent_id,
            session_key,
            resolved_path,
            created_at: payload.created_at_ms.and_then(from_millis),
            expires_at: from_millis(payload.expires_at_ms).unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Decision sent back to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalDecision {
    AllowOnce,
    AllowAlways,
    Deny,
}

impl ApprovalDecision {
    /// Wire value
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalDecision::AllowOnce => "allow-once",
            ApprovalDecision::AllowAlways => "allow-always",
            ApprovalDecision::Deny => "deny",
        }
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalDecision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow-once" | "once" | "allow" => Ok(ApprovalDecision::AllowOnce),
            "allow-always" | "always" => Ok(ApprovalDecision::AllowAlways),
            "deny" => Ok(ApprovalDecision::Deny),
            other => Err(Error::InvalidInput(format!("unknown approval decision: {}", other))),
        }
    }
}

/// Pending approvals, oldest first
#[derive(Debug, Clone, Default)]
pub struct ApprovalQueue {
    items: VecDeque<ExecApprovalRequest>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request. A request whose id is already queued replaces the
    /// queued one in place.
    pub fn enqueue(&mut self, request: ExecApprovalRequest) {
        match self.items.iter_mut().find(|item| item.id == request.id) {
            Some(existing) => *existing = request,
            None => self.items.push_back(request),
        }
    }

    /// The only visible prompt
    pub fn head(&self) -> Option<&ExecApprovalRequest> {
        self.items.front()
    }

    /// Remove by id. Returns the removed request.
    pub fn remove(&mut self, id: &str) -> Option<ExecApprovalRequest> {
        let index = self.items.iter().position(|item| item.id == id)?;
        self.items.remove(index)
    }

    /// Drop expired requests, returning how many were dropped
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.is_expired(now));
        before - self.items.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecApprovalRequest> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<ExecApprovalRequest> {
        self.items.iter().cloned().collect()
    }
}

/// Compact remaining-time label: `42s`, `5m`, `2h`. Negative input is `0s`.
pub fn format_remaining(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1000;
    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }
    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }
    format!("{}h", minutes / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(id: &str, expires_in_secs: i64) -> ExecApprovalRequest {
        ExecApprovalRequest {
            id: id.to_string(),
            command: format!("echo {}", id),
            cwd: None,
            host: Some("gateway".into()),
            security: None,
            ask: None,
            agent_id: None,
            session_key: None,
            resolved_path: None,
            created_at: None,
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn test_head_is_oldest() {
        let mut queue = ApprovalQueue::new();
        queue.enqueue(request("a1", 60));
        queue.enqueue(request("a2", 60));
        assert_eq!(queue.head().unwrap().id, "a1");

        queue.remove("a1");
        assert_eq!(queue.head().unwrap().id, "a2");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_duplicate_id_replaces_in_place() {
        let mut queue = ApprovalQueue::new();
        queue.enqueue(request("a1", 60));
        queue.enqueue(request("a2", 60));
        let mut updated = request("a1", 120);
        updated.command = "rm -rf build".into();
        queue.enqueue(updated);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.head().unwrap().command, "rm -rf build");
    }

    #[test]
    fn test_prune_expired() {
        let mut queue = ApprovalQueue::new();
        queue.enqueue(request("old", -5));
        queue.enqueue(request("fresh", 60));

        assert_eq!(queue.prune_expired(Utc::now()), 1);
        assert_eq!(queue.head().unwrap().id, "fresh");
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(-1), "0s");
        assert_eq!(format_remaining(999), "0s");
        assert_eq!(format_remaining(59_999), "59s");
        assert_eq!(format_remaining(60_000), "1m");
        assert_eq!(format_remaining(3_599_999), "59m");
        assert_eq!(format_remaining(7_200_000), "2h");
    }

    #[test]
    fn test_decision_wire_values() {
        assert_eq!(ApprovalDecision::AllowOnce.as_str(), "allow-once");
        assert_eq!(
            serde_json::to_value(ApprovalDecision::AllowAlways).unwrap(),
            "allow-always"
        );
        assert_eq!("deny".parse::<ApprovalDecision>().unwrap(), ApprovalDecision::Deny);
        assert!("maybe".parse::<ApprovalDecision>().is_err());
    }

    #[test]
    fn test_from_payload() {
        let payload: ExecApprovalRequestedPayload = serde_json::from_value(serde_json::json!({
            "id": "a1",
            "request": {"command": "ls", "host": "node", "agentId": "main"},
            "createdAtMs": 1_700_000_000_000i64,
            "expiresAtMs": 1_700_000_060_000i64
        }))
        .unwrap();
        let request = ExecApprovalRequest::from(payload);
        assert_eq!(request.command, "ls");
        assert_eq!(request.agent_id.as_deref(), Some("main"));
        assert_eq!(
            request.remaining_ms(request.created_at.unwrap()),
            60_000
        );
    }
}
