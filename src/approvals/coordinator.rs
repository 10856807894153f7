//! Exec approval coordinator
//!
//! Collects `exec.approval.requested` events into an [`ApprovalQueue`] and
//! sends the user's decision for the head prompt with
//! `exec.approval.resolve`. One decision is in flight at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::{ApprovalDecision, ApprovalQueue, ExecApprovalRequest};
use crate::config::ApprovalsConfig;
use crate::error::{Error, Result};
use crate::gateway::protocol::{
    events, methods, EventFrame, ExecApprovalRequestedPayload, ExecApprovalResolveParams,
    ExecApprovalResolvedPayload,
};
use crate::gateway::{GatewayClient, Subscription};

/// Point-in-time view of the approval queue
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalSnapshot {
    /// Prompt to show, if any
    pub head: Option<ExecApprovalRequest>,
    /// Number of pending prompts, head included
    pub pending: usize,
    /// A decision is in flight
    pub busy: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct ApprovalState {
    queue: ApprovalQueue,
    busy: bool,
    error: Option<String>,
}

impl ApprovalState {
    fn snapshot(&self) -> ApprovalSnapshot {
        ApprovalSnapshot {
            head: self.queue.head().cloned(),
            pending: self.queue.len(),
            busy: self.busy,
            error: self.error.clone(),
        }
    }
}

struct Inner {
    client: GatewayClient,
    config: ApprovalsConfig,
    state: Mutex<ApprovalState>,
    snapshot_tx: watch::Sender<ApprovalSnapshot>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ApprovalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<T>(&self, f: impl FnOnce(&mut ApprovalState) -> T) -> T {
        let mut state = self.lock();
        let out = f(&mut state);
        self.snapshot_tx.send_replace(state.snapshot());
        out
    }
}

/// Queue of exec approvals fed by gateway events
#[derive(Clone)]
pub struct ExecApprovalCoordinator {
    inner: Arc<Inner>,
    pump: Arc<JoinHandle<()>>,
}

impl ExecApprovalCoordinator {
    /// Subscribe to approval events on `client` and start collecting
    pub fn spawn(client: GatewayClient, config: ApprovalsConfig) -> Self {
        let subscription = client.subscribe_to(&[
            events::EXEC_APPROVAL_REQUESTED,
            events::EXEC_APPROVAL_RESOLVED,
        ]);
        let inner = Arc::new(Inner {
            client,
            config,
            state: Mutex::new(ApprovalState::default()),
            snapshot_tx: watch::channel(ApprovalSnapshot::default()).0,
        });

        let pump = tokio::spawn(pump_events(inner.clone(), subscription));
        ExecApprovalCoordinator {
            inner,
            pump: Arc::new(pump),
        }
    }

    pub fn snapshot(&self) -> ApprovalSnapshot {
        self.inner.lock().snapshot()
    }

    /// Receiver notified on every change
    pub fn watch(&self) -> watch::Receiver<ApprovalSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// The prompt currently awaiting a decision
    pub fn head(&self) -> Option<ExecApprovalRequest> {
        self.inner.lock().queue.head().cloned()
    }

    /// All pending prompts, head first
    pub fn pending(&self) -> Vec<ExecApprovalRequest> {
        self.inner.lock().queue.to_vec()
    }

    /// Decide the head prompt.
    ///
    /// On success the prompt leaves the queue. On failure it stays at the
    /// head and the reason is kept in [`ApprovalSnapshot::error`].
    pub async fn resolve(&self, decision: ApprovalDecision) -> Result<ExecApprovalRequest> {
        let active = self.inner.update(|state| {
            if state.busy {
                return Err(Error::Busy("an approval decision is already in flight".to_string()));
            }
            let head = state
                .queue
                .head()
                .cloned()
                .ok_or_else(|| Error::InvalidInput("no pending exec approval".to_string()))?;
            state.busy = true;
            state.error = None;
            Ok(head)
        })?;

        info!(id = %active.id, %decision, "Resolving exec approval");
        let params = ExecApprovalResolveParams {
            id: active.id.clone(),
            decision: decision.as_str().to_string(),
        };
        let result = self
            .inner
            .client
            .request::<_, Value>(methods::EXEC_APPROVAL_RESOLVE, &params)
            .await;

        self.inner.update(|state| {
            state.busy = false;
            match result {
                Ok(_) => {
                    state.queue.remove(&active.id);
                    Ok(active)
                }
                Err(err) => {
                    warn!(id = %active.id, error = %err, "Exec approval decision failed");
                    state.error = Some(format!("exec approval failed: {}", err));
                    Err(err)
                }
            }
        })
    }
}

impl Drop for ExecApprovalCoordinator {
    fn drop(&mut self) {
        if Arc::strong_count(&self.pump) == 1 {
            self.pump.abort();
        }
    }
}

async fn pump_events(inner: Arc<Inner>, mut events: Subscription) {
    while let Some(event) = events.recv().await {
        handle_event(&inner, event);
    }
    debug!("Exec approval event stream ended");
}

fn handle_event(inner: &Inner, event: EventFrame) {
    let Some(payload) = event.payload else {
        return;
    };
    match event.event.as_str() {
        events::EXEC_APPROVAL_REQUESTED => {
            let payload: ExecApprovalRequestedPayload = match serde_json::from_value(payload) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "Dropping malformed exec approval request");
                    return;
                }
            };
            let request = ExecApprovalRequest::from(payload);
            debug!(id = %request.id, command = %request.command, "Exec approval requested");
            let prune = inner.config.prune_expired;
            inner.update(|state| {
                if prune {
                    let pruned = state.queue.prune_expired(Utc::now());
                    if pruned > 0 {
                        debug!(pruned, "Dropped expired exec approvals");
                    }
                }
                state.queue.enqueue(request);
            });
        }
        events::EXEC_APPROVAL_RESOLVED => {
            let Ok(resolved) = serde_json::from_value::<ExecApprovalResolvedPayload>(payload) else {
                debug!("Dropping malformed exec approval resolution");
                return;
            };
            inner.update(|state| {
                if state.queue.remove(&resolved.id).is_some() {
                    debug!(id = %resolved.id, decision = ?resolved.decision, "Exec approval resolved elsewhere");
                }
            });
        }
        _ => {}
    }
}
