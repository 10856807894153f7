//! Chat run coordinator
//!
//! A task per session that owns the [`ChatRunState`] and the
//! [`OutboundQueue`]. Callers talk to it through a [`ChatHandle`]; it talks
//! to the gateway through a [`GatewayClient`] and listens to `chat` events
//! and connection state. Every change is published as a [`ChatSnapshot`].
//!
//! At most one run is in flight per session. Sends issued while busy are
//! queued and drained one at a time once the session is idle again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::message::{Attachment, ChatMessage};
use super::queue::{OutboundQueue, QueuedMessage};
use super::state::{ChatRunState, RunPhase};
use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::gateway::protocol::{
    events, methods, ChatAbortParams, ChatEventPayload, ChatHistoryParams, ChatHistoryResponse,
    ChatSendParams,
};
use crate::gateway::{ConnectionState, GatewayClient, Subscription};

/// Texts that abort the active run instead of being sent
const STOP_COMMANDS: &[&str] = &["/stop", "stop", "esc", "abort", "wait", "exit"];

/// Whether `text` is a stop command
pub fn is_stop_command(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    !normalized.is_empty() && STOP_COMMANDS.contains(&normalized.as_str())
}

/// What happened to a send request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// `chat.send` was accepted; the run streams under this id
    Sent { run_id: String },
    /// The session was busy; the text waits in the queue
    Queued { id: String },
    /// The session was busy and only attachments were given; they stay staged
    Staged,
    /// The text was a stop command and an abort was issued
    Aborted,
    /// Nothing to send
    Ignored,
}

/// Point-in-time view of a chat session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub session_key: String,
    pub connected: bool,
    pub phase: RunPhase,
    pub draft: String,
    /// Names of staged attachments
    pub attachments: Vec<String>,
    pub run_id: Option<String>,
    pub stream: Option<String>,
    pub stream_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub history: Vec<ChatMessage>,
    pub thinking_level: Option<String>,
    pub queue: Vec<QueuedMessage>,
    pub loading_history: bool,
}

impl ChatSnapshot {
    pub fn is_busy(&self) -> bool {
        self.phase != RunPhase::Idle
    }
}

/// Where a send came from, which decides how a failure is undone
#[derive(Debug)]
enum SendOrigin {
    /// Typed by the user: restore draft and attachments on failure
    Draft {
        previous_draft: String,
        attachments: Vec<Attachment>,
    },
    /// Issued by code: nothing to restore
    Direct,
    /// Drained from the queue: put the item back at the head
    Queue(QueuedMessage),
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    SetDraft(String),
    Attach(Attachment),
    ClearAttachments,
    SendDraft(Reply<SendOutcome>),
    Send {
        text: String,
        attachments: Vec<Attachment>,
        reply: Reply<SendOutcome>,
    },
    Abort(Reply<()>),
    RemoveQueued {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    LoadHistory(Reply<()>),
}

enum Completion {
    Send {
        run_id: String,
        origin: SendOrigin,
        result: Result<Value>,
        reply: Option<Reply<SendOutcome>>,
    },
    History {
        result: Result<ChatHistoryResponse>,
        reply: Reply<()>,
    },
}

/// Handle to a running chat coordinator. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    session_key: String,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ChatSnapshot>,
}

impl ChatHandle {
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Latest published state
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.snapshots.borrow().is_busy()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let _ = self.commands.send(Command::SetDraft(text.into()));
    }

    /// Stage a file for the next draft send
    pub fn attach(&self, attachment: Attachment) {
        let _ = self.commands.send(Command::Attach(attachment));
    }

    pub fn clear_attachments(&self) {
        let _ = self.commands.send(Command::ClearAttachments);
    }

    /// Send the current draft and staged attachments.
    ///
    /// The draft is cleared right away and restored if the gateway rejects
    /// the send.
    pub async fn send_draft(&self) -> Result<SendOutcome> {
        self.ask(Command::SendDraft).await
    }

    /// Send `text` and `attachments` without touching the draft
    pub async fn send(&self, text: impl Into<String>, attachments: Vec<Attachment>) -> Result<SendOutcome> {
        let text = text.into();
        self.ask(|reply| Command::Send {
            text,
            attachments,
            reply,
        })
        .await
    }

    /// Ask the gateway to abort the active run.
    ///
    /// Local state only changes once the gateway reports the run's end.
    pub async fn abort(&self) -> Result<()> {
        self.ask(Command::Abort).await
    }

    /// Cancel a queued message. Returns whether it was still queued.
    pub async fn remove_queued(&self, id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let sent = self.commands.send(Command::RemoveQueued {
            id: id.to_string(),
            reply,
        });
        sent.is_ok() && rx.await.unwrap_or(false)
    }

    /// Replace the visible history with the gateway's copy
    pub async fn load_history(&self) -> Result<()> {
        self.ask(Command::LoadHistory).await
    }

    async fn ask<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }
}

fn stopped() -> Error {
    Error::Internal("chat coordinator stopped".to_string())
}

/// Owns one session's chat state
pub struct ChatCoordinator {
    client: GatewayClient,
    state: ChatRunState,
    queue: OutboundQueue,
    history_limit: u32,
    connected: bool,
    loading_history: bool,
    completions_tx: mpsc::UnboundedSender<Completion>,
    snapshot_tx: watch::Sender<ChatSnapshot>,
}

impl ChatCoordinator {
    /// Start a coordinator for `config.session_key` on `client`
    pub fn spawn(client: GatewayClient, config: &ChatConfig) -> ChatHandle {
        let events = client.subscribe(events::CHAT);
        let connection = client.state_changes();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let mut coordinator = ChatCoordinator {
            connected: client.is_connected(),
            client,
            state: ChatRunState::new(config.session_key.clone()),
            queue: OutboundQueue::new(),
            history_limit: config.history_limit,
            loading_history: false,
            completions_tx,
            snapshot_tx: watch::channel(ChatSnapshot {
                session_key: config.session_key.clone(),
                connected: false,
                phase: RunPhase::Idle,
                draft: String::new(),
                attachments: Vec::new(),
                run_id: None,
                stream: None,
                stream_started_at: None,
                last_error: None,
                history: Vec::new(),
                thinking_level: None,
                queue: Vec::new(),
                loading_history: false,
            })
            .0,
        };
        coordinator.publish();
        let snapshots = coordinator.snapshot_tx.subscribe();

        tokio::spawn(coordinator.run(commands_rx, completions_rx, events, connection));

        ChatHandle {
            session_key: config.session_key.clone(),
            commands: commands_tx,
            snapshots,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut events: Subscription,
        mut connection: watch::Receiver<ConnectionState>,
    ) {
        debug!(session = %self.state.session_key, "Chat coordinator started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event.payload),
                    None => break,
                },
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *connection.borrow_and_update();
                    self.handle_connection(state);
                }
            }
            self.publish();
        }
        debug!(session = %self.state.session_key, "Chat coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetDraft(text) => self.state.draft = text,
            Command::Attach(attachment) => self.state.attachments.push(attachment),
            Command::ClearAttachments => self.state.attachments.clear(),
            Command::SendDraft(reply) => {
                let text = self.state.draft.clone();
                let attachments = self.state.attachments.clone();
                self.submit(text, attachments, true, reply);
            }
            Command::Send {
                text,
                attachments,
                reply,
            } => self.submit(text, attachments, false, reply),
            Command::Abort(reply) => self.abort(Some(reply)),
            Command::RemoveQueued { id, reply } => {
                let _ = reply.send(self.queue.remove(&id));
            }
            Command::LoadHistory(reply) => self.load_history(reply),
        }
    }

    fn submit(
        &mut self,
        text: String,
        attachments: Vec<Attachment>,
        from_draft: bool,
        reply: Reply<SendOutcome>,
    ) {
        if !self.connected {
            let _ = reply.send(Err(Error::NotConnected));
            return;
        }

        let message = text.trim().to_string();
        if message.is_empty() && attachments.is_empty() {
            let _ = reply.send(Ok(SendOutcome::Ignored));
            return;
        }

        if is_stop_command(&message) {
            if from_draft {
                self.state.draft.clear();
            }
            self.abort(None);
            let _ = reply.send(Ok(SendOutcome::Aborted));
            return;
        }

        let previous_draft = if from_draft {
            self.state.attachments.clear();
            std::mem::take(&mut self.state.draft)
        } else {
            String::new()
        };

        if self.state.is_busy() {
            if !attachments.is_empty() {
                // Attachments cannot be queued; keep them staged for the next send
                self.state.attachments = attachments;
            }
            let outcome = match self.queue.enqueue(&message) {
                Some(item) => SendOutcome::Queued {
                    id: item.id.clone(),
                },
                None => SendOutcome::Staged,
            };
            debug!(queued = self.queue.len(), "Session busy, deferring send");
            let _ = reply.send(Ok(outcome));
            return;
        }

        let origin = if from_draft {
            SendOrigin::Draft {
                previous_draft,
                attachments: attachments.clone(),
            }
        } else {
            SendOrigin::Direct
        };
        self.start_send(message, attachments, origin, Some(reply));
    }

    fn start_send(
        &mut self,
        message: String,
        attachments: Vec<Attachment>,
        origin: SendOrigin,
        reply: Option<Reply<SendOutcome>>,
    ) {
        let run_id = self.state.begin_run(&message, &attachments);
        let params = ChatSendParams {
            session_key: self.state.session_key.clone(),
            message: if message.is_empty() {
                " ".to_string()
            } else {
                message
            },
            deliver: false,
            idempotency_key: run_id.clone(),
            attachments: if attachments.is_empty() {
                None
            } else {
                Some(attachments.iter().map(Attachment::to_payload).collect())
            },
        };

        info!(session = %self.state.session_key, %run_id, "Sending chat message");
        let client = self.client.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = client.request::<_, Value>(methods::CHAT_SEND, &params).await;
            let _ = completions.send(Completion::Send {
                run_id,
                origin,
                result,
                reply,
            });
        });
    }

    fn abort(&mut self, reply: Option<Reply<()>>) {
        let params = ChatAbortParams {
            session_key: self.state.session_key.clone(),
            run_id: self.state.run_id.clone(),
        };
        info!(session = %params.session_key, run_id = ?params.run_id, "Aborting chat run");
        let client = self.client.clone();
        tokio::spawn(async move {
            let result = client
                .request::<_, Value>(methods::CHAT_ABORT, &params)
                .await
                .map(|_| ());
            if let Err(err) = &result {
                warn!(error = %err, "chat.abort failed");
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        });
    }

    fn load_history(&mut self, reply: Reply<()>) {
        if !self.connected {
            let _ = reply.send(Err(Error::NotConnected));
            return;
        }
        self.loading_history = true;
        self.state.last_error = None;

        let params = ChatHistoryParams {
            session_key: self.state.session_key.clone(),
            limit: self.history_limit,
        };
        let client = self.client.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = client.request(methods::CHAT_HISTORY, &params).await;
            let _ = completions.send(Completion::History { result, reply });
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Send {
                run_id,
                origin,
                result,
                reply,
            } => match result {
                Ok(_) => {
                    debug!(%run_id, "chat.send acknowledged");
                    self.state.send_acknowledged();
                    if let Some(reply) = reply {
                        let _ = reply.send(Ok(SendOutcome::Sent { run_id }));
                    }
                    self.flush();
                }
                Err(err) => {
                    warn!(%run_id, error = %err, "chat.send failed");
                    self.state.send_failed(&run_id, &err.to_string());
                    match origin {
                        SendOrigin::Draft {
                            previous_draft,
                            attachments,
                        } => {
                            self.state.draft = previous_draft;
                            if !attachments.is_empty() {
                                self.state.attachments = attachments;
                            }
                        }
                        SendOrigin::Queue(item) => self.queue.push_front(item),
                        SendOrigin::Direct => {}
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(err));
                    }
                }
            },
            Completion::History { result, reply } => {
                self.loading_history = false;
                match result {
                    Ok(history) => {
                        self.state.set_history(&history.messages, history.thinking_level);
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        self.state.last_error = Some(err.to_string());
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, payload: Option<Value>) {
        let Some(payload) = payload else {
            return;
        };
        let event: ChatEventPayload = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(err) => {
                debug!(error = %err, "Dropping malformed chat event");
                return;
            }
        };

        if let Some(state) = self.state.apply_event(&event) {
            if state.is_terminal() {
                debug!(run_id = ?event.run_id, ?state, "Chat run ended");
                self.flush();
            }
        }
    }

    fn handle_connection(&mut self, state: ConnectionState) {
        let connected = state == ConnectionState::Open;
        if connected == self.connected {
            return;
        }
        self.connected = connected;
        if connected {
            self.flush();
        } else if self.state.disconnected() {
            warn!(session = %self.state.session_key, "Gateway disconnected during a chat run");
        }
    }

    /// Send the head of the queue if the session is idle
    fn flush(&mut self) {
        if !self.connected || self.state.is_busy() {
            return;
        }
        let Some(item) = self.queue.pop_front() else {
            return;
        };
        debug!(id = %item.id, remaining = self.queue.len(), "Flushing queued message");
        self.start_send(item.text.clone(), Vec::new(), SendOrigin::Queue(item), None);
    }

    fn publish(&self) {
        let state = &self.state;
        self.snapshot_tx.send_replace(ChatSnapshot {
            session_key: state.session_key.clone(),
            connected: self.connected,
            phase: state.phase(),
            draft: state.draft.clone(),
            attachments: state
                .attachments
                .iter()
                .map(|a| a.file_name.clone())
                .collect(),
            run_id: state.run_id.clone(),
            stream: state.stream.clone(),
            stream_started_at: state.stream_started_at,
            last_error: state.last_error.clone(),
            history: state.history.clone(),
            thinking_level: state.thinking_level.clone(),
            queue: self.queue.to_vec(),
            loading_history: self.loading_history,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::gateway::memory::{memory_transport, GatewaySide, MemoryGateway};
    use serde_json::json;
    use std::time::Duration;

    async fn setup(session: &str) -> (ChatHandle, GatewayClient, MemoryGateway, GatewaySide) {
        let mut config = GatewayConfig::with_url("ws://127.0.0.1:18789");
        config.reconnect_delay = Duration::from_millis(20);
        let (connector, mut gateway) = memory_transport();
        let client = GatewayClient::spawn(config, connector);
        let (side, _) = gateway.accept_handshake().await.unwrap();
        client.wait_until_open().await.unwrap();

        let chat = ChatCoordinator::spawn(
            client.clone(),
            &ChatConfig {
                session_key: session.to_string(),
                history_limit: 50,
            },
        );
        wait_for(&chat, |s| s.connected).await;
        (chat, client, gateway, side)
    }

    async fn wait_for(chat: &ChatHandle, predicate: impl Fn(&ChatSnapshot) -> bool) -> ChatSnapshot {
        let mut rx = chat.watch();
        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| predicate(s)))
            .await
            .expect("timed out waiting for chat state")
            .unwrap()
            .clone();
        snapshot
    }

    fn chat_event(side: &GatewaySide, session: &str, run_id: &str, state: &str, message: Value) {
        side.emit(
            "chat",
            json!({"sessionKey": session, "runId": run_id, "state": state, "message": message}),
        );
    }

    #[test]
    fn test_stop_commands() {
        assert!(is_stop_command(" /STOP "));
        assert!(is_stop_command("wait"));
        assert!(!is_stop_command("stop it"));
        assert!(!is_stop_command(""));
    }

    #[tokio::test]
    async fn test_send_enters_sending_with_fresh_idempotency_key() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let sender = chat.clone();
        tokio::spawn(async move { sender.send("hello", Vec::new()).await });

        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        let params = req.params.unwrap();
        assert_eq!(params["sessionKey"], "s1");
        assert_eq!(params["message"], "hello");
        assert_eq!(params["deliver"], false);

        let snapshot = wait_for(&chat, |s| s.phase == RunPhase::Sending).await;
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.history[0].role, "user");
        assert_eq!(
            snapshot.run_id.as_deref(),
            params["idempotencyKey"].as_str()
        );
    }

    #[tokio::test]
    async fn test_queued_message_flushes_after_final() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let sender = chat.clone();
        let first = tokio::spawn(async move { sender.send("hello", Vec::new()).await });
        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        let run_id = req.params.as_ref().unwrap()["idempotencyKey"]
            .as_str()
            .unwrap()
            .to_string();

        // Busy: queued, no second chat.send
        let outcome = chat.send("world", Vec::new()).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Queued { .. }));
        assert_eq!(chat.snapshot().queue.len(), 1);
        assert!(side.try_next_request().is_none());

        side.respond(&req.id, json!({"runId": run_id}));
        assert_eq!(
            first.await.unwrap().unwrap(),
            SendOutcome::Sent {
                run_id: run_id.clone()
            }
        );
        assert!(side.try_next_request().is_none());

        chat_event(&side, "s1", &run_id, "delta", json!({"text": "h"}));
        chat_event(
            &side,
            "s1",
            &run_id,
            "final",
            json!({"role": "assistant", "content": [{"type": "text", "text": "hi"}]}),
        );

        let next = side.expect_request(methods::CHAT_SEND).await.unwrap();
        assert_eq!(next.params.as_ref().unwrap()["message"], "world");

        let snapshot = wait_for(&chat, |s| s.queue.is_empty() && s.history.len() == 3).await;
        assert_eq!(snapshot.history[1].text(), "hi");
        assert_eq!(snapshot.history[2].text(), "world");
        assert!(snapshot.stream.as_deref().map_or(true, str::is_empty));
        assert_ne!(snapshot.run_id.as_deref(), Some(run_id.as_str()));
    }

    #[tokio::test]
    async fn test_many_sends_while_busy_drain_in_order() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let sender = chat.clone();
        tokio::spawn(async move { sender.send("first", Vec::new()).await });
        let mut req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        for text in ["a", "b", "c"] {
            chat.send(text, Vec::new()).await.unwrap();
        }

        let mut sent = Vec::new();
        for _ in 0..4 {
            let params = req.params.clone().unwrap();
            sent.push(params["message"].as_str().unwrap().to_string());
            let run_id = params["idempotencyKey"].as_str().unwrap().to_string();
            side.respond(&req.id, json!({}));
            chat_event(&side, "s1", &run_id, "final", Value::Null);
            if sent.len() < 4 {
                req = side.expect_request(methods::CHAT_SEND).await.unwrap();
            }
        }
        assert_eq!(sent, vec!["first", "a", "b", "c"]);
        wait_for(&chat, |s| s.phase == RunPhase::Idle && s.queue.is_empty()).await;
        assert!(side.try_next_request().is_none());
    }

    #[tokio::test]
    async fn test_rejected_draft_send_rolls_back_and_restores_draft() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        chat.set_draft("hello");
        let sender = chat.clone();
        let send = tokio::spawn(async move { sender.send_draft().await });

        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        side.fail(&req.id, "rate limited", Some("RATE_LIMITED"));

        let err = send.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "rate limited");

        let snapshot = wait_for(&chat, |s| s.phase == RunPhase::Idle).await;
        assert!(snapshot.run_id.is_none());
        assert_eq!(snapshot.draft, "hello");
        let entry = snapshot.history.last().unwrap();
        assert_eq!(entry.role, "assistant");
        assert!(entry.text().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_rejected_direct_send_keeps_draft_untouched() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        chat.set_draft("unrelated");
        let sender = chat.clone();
        let send = tokio::spawn(async move { sender.send("hello", Vec::new()).await });
        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        side.fail(&req.id, "rate limited", None);
        assert!(send.await.unwrap().is_err());

        let snapshot = wait_for(&chat, |s| s.phase == RunPhase::Idle).await;
        assert_eq!(snapshot.draft, "unrelated");
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_at_head() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let sender = chat.clone();
        tokio::spawn(async move { sender.send("first", Vec::new()).await });
        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        chat.send("a", Vec::new()).await.unwrap();
        chat.send("b", Vec::new()).await.unwrap();

        let run_id = req.params.unwrap()["idempotencyKey"].as_str().unwrap().to_string();
        side.respond(&req.id, json!({}));
        chat_event(&side, "s1", &run_id, "aborted", Value::Null);

        let flushed = side.expect_request(methods::CHAT_SEND).await.unwrap();
        assert_eq!(flushed.params.as_ref().unwrap()["message"], "a");
        side.fail(&flushed.id, "busy", None);

        let snapshot = wait_for(&chat, |s| s.phase == RunPhase::Idle && s.queue.len() == 2).await;
        let order: Vec<&str> = snapshot.queue.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stop_command_aborts_active_run() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let sender = chat.clone();
        tokio::spawn(async move { sender.send("long task", Vec::new()).await });
        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        let run_id = req.params.unwrap()["idempotencyKey"].as_str().unwrap().to_string();
        side.respond(&req.id, json!({}));
        wait_for(&chat, |s| s.phase == RunPhase::Streaming).await;

        assert_eq!(chat.send("/stop", Vec::new()).await.unwrap(), SendOutcome::Aborted);
        let abort = side.expect_request(methods::CHAT_ABORT).await.unwrap();
        assert_eq!(abort.params.as_ref().unwrap()["runId"], run_id.as_str());
        side.respond(&abort.id, json!({"ok": true}));

        // Still streaming until the gateway confirms
        assert_eq!(chat.snapshot().phase, RunPhase::Streaming);
        assert!(chat.snapshot().queue.is_empty());

        chat_event(&side, "s1", &run_id, "aborted", Value::Null);
        wait_for(&chat, |s| s.phase == RunPhase::Idle).await;
    }

    #[tokio::test]
    async fn test_abort_while_idle_omits_run_id() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let aborter = chat.clone();
        let abort = tokio::spawn(async move { aborter.abort().await });
        let req = side.expect_request(methods::CHAT_ABORT).await.unwrap();
        let params = req.params.clone().unwrap();
        assert_eq!(params["sessionKey"], "s1");
        assert!(params.get("runId").is_none());
        side.respond(&req.id, json!({"ok": true}));

        abort.await.unwrap().unwrap();
        let snapshot = chat.snapshot();
        assert_eq!(snapshot.phase, RunPhase::Idle);
        assert!(snapshot.run_id.is_none());
        assert!(snapshot.history.is_empty());
    }

    #[tokio::test]
    async fn test_removed_queued_message_is_never_sent() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let sender = chat.clone();
        tokio::spawn(async move { sender.send("first", Vec::new()).await });
        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        let run_id = req.params.clone().unwrap()["idempotencyKey"]
            .as_str()
            .unwrap()
            .to_string();

        let SendOutcome::Queued { id: queued_a } = chat.send("a", Vec::new()).await.unwrap() else {
            panic!("expected a to be queued");
        };
        chat.send("b", Vec::new()).await.unwrap();

        assert!(chat.remove_queued(&queued_a).await);
        assert!(!chat.remove_queued(&queued_a).await);
        let queue: Vec<String> = chat.snapshot().queue.iter().map(|m| m.text.clone()).collect();
        assert_eq!(queue, vec!["b"]);

        side.respond(&req.id, json!({}));
        chat_event(&side, "s1", &run_id, "final", Value::Null);

        let flushed = side.expect_request(methods::CHAT_SEND).await.unwrap();
        assert_eq!(flushed.params.as_ref().unwrap()["message"], "b");
        let next_run = flushed.params.as_ref().unwrap()["idempotencyKey"]
            .as_str()
            .unwrap()
            .to_string();
        side.respond(&flushed.id, json!({}));
        chat_event(&side, "s1", &next_run, "final", Value::Null);

        let snapshot = wait_for(&chat, |s| s.phase == RunPhase::Idle && s.queue.is_empty()).await;
        assert!(snapshot.history.iter().all(|m| m.text() != "a"));
        assert!(side.try_next_request().is_none());
    }

    #[tokio::test]
    async fn test_attachments_are_encoded_and_restaged_when_busy() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let file = Attachment::new("a.txt", Some("text/plain".into()), b"hi".to_vec());
        let sender = chat.clone();
        let upload = file.clone();
        tokio::spawn(async move { sender.send("", vec![upload]).await });

        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        let params = req.params.unwrap();
        assert_eq!(params["message"], " ");
        assert_eq!(
            params["attachments"][0],
            json!({"type": "file", "mimeType": "text/plain", "fileName": "a.txt", "content": "aGk="})
        );

        let outcome = chat.send("later", vec![file]).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Queued { .. }));
        let snapshot = chat.snapshot();
        assert_eq!(snapshot.attachments, vec!["a.txt".to_string()]);
        assert_eq!(snapshot.queue[0].text, "later");
    }

    #[tokio::test]
    async fn test_events_for_other_sessions_are_ignored() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let sender = chat.clone();
        tokio::spawn(async move { sender.send("q", Vec::new()).await });
        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        let run_id = req.params.unwrap()["idempotencyKey"].as_str().unwrap().to_string();
        side.respond(&req.id, json!({}));

        chat_event(&side, "s2", &run_id, "final", json!({"role": "assistant", "content": "x"}));
        chat_event(&side, "s1", &run_id, "delta", json!({"text": "partial"}));

        let snapshot = wait_for(&chat, |s| s.stream.as_deref() == Some("partial")).await;
        assert_eq!(snapshot.phase, RunPhase::Streaming);
        assert_eq!(snapshot.history.len(), 1);
    }

    #[tokio::test]
    async fn test_load_history_replaces_messages() {
        let (chat, _client, _gateway, mut side) = setup("s1").await;

        let loader = chat.clone();
        let load = tokio::spawn(async move { loader.load_history().await });
        let req = side.expect_request(methods::CHAT_HISTORY).await.unwrap();
        assert_eq!(req.params.as_ref().unwrap()["limit"], 50);
        side.respond(
            &req.id,
            json!({
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": [{"type": "text", "text": "hello"}]}
                ],
                "thinkingLevel": "low"
            }),
        );
        load.await.unwrap().unwrap();

        let snapshot = chat.snapshot();
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.thinking_level.as_deref(), Some("low"));
        assert!(!snapshot.loading_history);
    }

    #[tokio::test]
    async fn test_disconnect_clears_run_and_queue_flushes_on_reconnect() {
        let (chat, client, mut gateway, mut side) = setup("s1").await;

        let sender = chat.clone();
        tokio::spawn(async move { sender.send("q", Vec::new()).await });
        let req = side.expect_request(methods::CHAT_SEND).await.unwrap();
        side.respond(&req.id, json!({}));
        wait_for(&chat, |s| s.phase == RunPhase::Streaming).await;
        chat.send("after", Vec::new()).await.unwrap();

        drop(side);
        let snapshot = wait_for(&chat, |s| !s.connected).await;
        assert_eq!(snapshot.phase, RunPhase::Idle);
        assert_eq!(snapshot.last_error.as_deref(), Some("gateway disconnected"));
        assert!(matches!(
            chat.send("offline", Vec::new()).await,
            Err(Error::NotConnected)
        ));

        let (mut side, _) = gateway.accept_handshake().await.unwrap();
        client.wait_until_open().await.unwrap();
        let flushed = side.expect_request(methods::CHAT_SEND).await.unwrap();
        assert_eq!(flushed.params.unwrap()["message"], "after");
    }
}
