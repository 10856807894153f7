//! Gateway client - the frame correlator
//!
//! Owns the single connection to the gateway. Every outgoing request gets a
//! fresh id and a pending slot; the matching response resolves that slot
//! exactly once. Event frames are fanned out, in receipt order, to every
//! live subscription. The connection is re-established after a fixed delay
//! whenever it drops, and the `connect` handshake is repeated each time.
//!
//! Requests still pending when a connection drops are rejected with
//! [`Error::ConnectionClosed`]; an optional per-call timeout rejects a single
//! call with [`Error::Timeout`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::protocol::{
    methods, ClientInfo, ConnectAuth, ConnectParams, EventFrame, GatewayFrame, RequestFrame,
    ResponseFrame,
};
use super::transport::{Connection, Connector, WsConnector};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};

/// Connection lifecycle as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening the transport
    Connecting,
    /// Transport open, `connect` handshake in flight
    Handshaking,
    /// Ready for calls
    Open,
    /// Disconnected, waiting to reconnect (or shut down)
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Handshaking => write!(f, "handshaking"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

type Reply = oneshot::Sender<Result<Value>>;

/// A request awaiting its response
struct PendingRequest {
    /// Connection generation the request was written on
    generation: u64,
    reply: Reply,
}

struct Listener {
    /// Event names to deliver; `None` delivers everything
    events: Option<Vec<String>>,
    tx: mpsc::UnboundedSender<EventFrame>,
}

struct Shared {
    config: GatewayConfig,
    instance_id: String,
    pending: Mutex<HashMap<String, PendingRequest>>,
    outbound: Mutex<Option<(u64, mpsc::UnboundedSender<String>)>>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_listener: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    hello: Mutex<Option<Value>>,
    last_seq: Mutex<Option<u64>>,
    sequence_gaps: AtomicU64,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the gateway connection. Cheap to clone; all clones share the
/// same connection, pending table and subscriptions.
#[derive(Clone)]
pub struct GatewayClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("url", &self.shared.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl GatewayClient {
    /// Connect to the WebSocket endpoint named in `config`.
    ///
    /// Returns immediately; the connection is established in the background.
    pub fn connect(config: GatewayConfig) -> Result<Self> {
        let connector = WsConnector::new(&config.url)?;
        Ok(Self::spawn(config, connector))
    }

    /// Start the connection loop over an arbitrary connector
    pub fn spawn<C: Connector>(config: GatewayConfig, connector: C) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let shared = Arc::new(Shared {
            config,
            instance_id: uuid::Uuid::new_v4().to_string(),
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
            state_tx,
            hello: Mutex::new(None),
            last_seq: Mutex::new(None),
            sequence_gaps: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(run_connection_loop(shared.clone(), Arc::new(connector)));
        *lock(&shared.task) = Some(task);

        GatewayClient { shared }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Whether calls are currently accepted
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch connection state changes
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the connection is open (or the client shut down)
    pub async fn wait_until_open(&self) -> Result<()> {
        let mut rx = self.state_changes();
        loop {
            if *rx.borrow_and_update() == ConnectionState::Open {
                return Ok(());
            }
            if self.shared.shutdown.is_cancelled() {
                return Err(Error::NotConnected);
            }
            if rx.changed().await.is_err() {
                return Err(Error::NotConnected);
            }
        }
    }

    /// Payload of the last successful handshake
    pub fn hello(&self) -> Option<Value> {
        lock(&self.shared.hello).clone()
    }

    /// Number of sequence gaps observed on the event stream
    pub fn sequence_gaps(&self) -> u64 {
        self.shared.sequence_gaps.load(Ordering::Relaxed)
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Issue a request and wait for its response.
    ///
    /// Fails immediately with [`Error::NotConnected`] unless the connection
    /// is open. A response with `ok: false` becomes [`Error::Rpc`] carrying
    /// the gateway's message and code.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let (id, reply) = self.shared.dispatch(method, params)?;
        self.await_reply(&id, reply).await
    }

    /// Typed wrapper around [`GatewayClient::call`]
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let payload = self.call(method, Some(params)).await?;
        Ok(serde_json::from_value(payload)?)
    }

    async fn await_reply(&self, id: &str, reply: oneshot::Receiver<Result<Value>>) -> Result<Value> {
        let outcome = match self.shared.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    lock(&self.shared.pending).remove(id);
                    return Err(Error::Timeout(format!(
                        "no response to request {} within {:?}",
                        id, limit
                    )));
                }
            },
            None => reply.await,
        };

        outcome.unwrap_or_else(|_| Err(Error::ConnectionClosed("request abandoned".to_string())))
    }

    /// Subscribe to every event
    pub fn subscribe_all(&self) -> Subscription {
        self.shared.add_listener(None)
    }

    /// Subscribe to one event name
    pub fn subscribe(&self, event: &str) -> Subscription {
        self.shared.add_listener(Some(vec![event.to_string()]))
    }

    /// Subscribe to several event names on one stream, keeping their
    /// relative order
    pub fn subscribe_to(&self, events: &[&str]) -> Subscription {
        self.shared
            .add_listener(Some(events.iter().map(|name| name.to_string()).collect()))
    }

    /// Stop reconnecting, close the connection and reject pending requests
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let task = lock(&self.shared.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Shared {
    /// Register a pending slot and write the request frame
    fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(String, oneshot::Receiver<Result<Value>>)> {
        let outbound = lock(&self.outbound);
        let Some((generation, tx)) = outbound.as_ref() else {
            return Err(Error::NotConnected);
        };

        let id = uuid::Uuid::new_v4().to_string();
        let frame = GatewayFrame::Request(RequestFrame::new(id.clone(), method, params));
        let text = frame.to_text()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(
            id.clone(),
            PendingRequest {
                generation: *generation,
                reply: reply_tx,
            },
        );

        trace!(%id, method, "request");
        if tx.send(text).is_err() {
            lock(&self.pending).remove(&id);
            return Err(Error::NotConnected);
        }

        Ok((id, reply_rx))
    }

    fn handle_text(&self, generation: u64, text: &str) {
        let frame = match GatewayFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "Dropping malformed gateway frame");
                return;
            }
        };

        match frame {
            GatewayFrame::Response(res) => self.handle_response(generation, res),
            GatewayFrame::Event(event) => self.handle_event(event),
            GatewayFrame::Request(req) => {
                debug!(method = %req.method, "Ignoring request frame from gateway");
            }
        }
    }

    fn handle_response(&self, generation: u64, res: ResponseFrame) {
        let entry = {
            let mut pending = lock(&self.pending);
            match pending.get(&res.id) {
                Some(entry) if entry.generation == generation => pending.remove(&res.id),
                Some(_) => {
                    debug!(id = %res.id, "Dropping response from a previous connection");
                    None
                }
                None => None,
            }
        };

        match entry {
            Some(entry) => {
                trace!(id = %res.id, ok = res.ok, "response");
                let _ = entry.reply.send(res.into_result());
            }
            None => debug!(id = %res.id, "Dropping response without pending request"),
        }
    }

    fn handle_event(&self, event: EventFrame) {
        if let Some(seq) = event.seq {
            let mut last = lock(&self.last_seq);
            if let Some(prev) = *last {
                if seq > prev && seq - prev > 1 {
                    warn!(last = prev, received = seq, "Event sequence gap");
                    self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
                }
            }
            *last = Some(seq);
        }

        trace!(event = %event.event, seq = ?event.seq, "event");
        let mut listeners = lock(&self.listeners);
        listeners.retain(|_, listener| {
            if listener
                .events
                .as_ref()
                .map_or(false, |names| !names.iter().any(|name| *name == event.event))
            {
                return true;
            }
            listener.tx.send(event.clone()).is_ok()
        });
    }

    fn add_listener(self: &Arc<Self>, events: Option<Vec<String>>) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.shutdown.is_cancelled() {
            lock(&self.listeners).insert(id, Listener { events, tx });
        }
        Subscription {
            id,
            rx,
            shared: Arc::downgrade(self),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn reject_pending(&self, reason: &str) {
        let drained: Vec<PendingRequest> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), reason, "Rejecting pending requests");
        }
        for entry in drained {
            let _ = entry.reply.send(Err(Error::ConnectionClosed(reason.to_string())));
        }
    }

    fn connect_params(&self) -> Value {
        let config = &self.config;
        let auth = if config.token.is_some() || config.password.is_some() {
            Some(ConnectAuth {
                token: config.token.as_ref().map(|t| t.expose_secret().to_string()),
                password: config.password.as_ref().map(|p| p.expose_secret().to_string()),
            })
        } else {
            None
        };

        let params = ConnectParams {
            min_protocol: config.min_protocol,
            max_protocol: config.max_protocol,
            client: ClientInfo {
                id: config.client_id.clone(),
                version: config.client_version.clone(),
                platform: config.platform.clone(),
                mode: config.client_mode.clone(),
                instance_id: Some(self.instance_id.clone()),
            },
            auth,
        };

        serde_json::to_value(params).unwrap_or(Value::Null)
    }
}

async fn run_connection_loop(shared: Arc<Shared>, connector: Arc<dyn Connector>) {
    let mut generation: u64 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);
        debug!(endpoint = %connector.endpoint(), "Connecting to gateway");

        let attempt = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            attempt = connector.connect() => attempt,
        };

        match attempt {
            Ok(connection) => {
                generation += 1;
                serve_connection(&shared, generation, connection).await;
            }
            Err(err) => warn!(endpoint = %connector.endpoint(), error = %err, "Gateway connection failed"),
        }

        lock(&shared.outbound).take();
        shared.reject_pending("connection lost");
        shared.set_state(ConnectionState::Closed);

        let delay = shared.config.reconnect_delay;
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        info!(delay_ms = delay.as_millis() as u64, "Reconnecting to gateway");
    }

    lock(&shared.outbound).take();
    shared.reject_pending("client shut down");
    lock(&shared.listeners).clear();
    shared.set_state(ConnectionState::Closed);
    debug!("Gateway connection loop stopped");
}

async fn serve_connection(shared: &Arc<Shared>, generation: u64, connection: Connection) {
    let Connection {
        outbound,
        mut inbound,
    } = connection;

    *lock(&shared.outbound) = Some((generation, outbound));
    *lock(&shared.last_seq) = None;
    shared.set_state(ConnectionState::Handshaking);

    let mut handshake = match shared.dispatch(methods::CONNECT, Some(shared.connect_params())) {
        Ok((_, reply)) => Some(reply),
        Err(err) => {
            warn!(error = %err, "Failed to send handshake");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            outcome = wait_handshake(&mut handshake) => {
                handshake = None;
                match outcome {
                    Ok(hello) => {
                        *lock(&shared.hello) = Some(hello);
                        shared.set_state(ConnectionState::Open);
                        info!(generation, "Gateway connected");
                    }
                    Err(err) => {
                        warn!(error = %err, "Gateway handshake failed");
                        return;
                    }
                }
            }
            text = inbound.recv() => match text {
                Some(text) => shared.handle_text(generation, &text),
                None => {
                    info!(generation, "Gateway connection closed");
                    return;
                }
            },
        }
    }
}

async fn wait_handshake(handshake: &mut Option<oneshot::Receiver<Result<Value>>>) -> Result<Value> {
    match handshake.as_mut() {
        Some(reply) => reply
            .await
            .unwrap_or_else(|_| Err(Error::Handshake("handshake abandoned".to_string())))
            .map_err(|err| Error::Handshake(err.to_string())),
        None => std::future::pending().await,
    }
}

/// Stream of events for one subscriber. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<EventFrame>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Next event, `None` after the client shut down
    pub async fn recv(&mut self) -> Option<EventFrame> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<EventFrame> {
        self.rx.try_recv().ok()
    }

    /// Unsubscribe explicitly
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.listeners).remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::{memory_transport, GatewaySide, MemoryGateway};
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn test_config() -> GatewayConfig {
        let mut config = GatewayConfig::with_url("ws://127.0.0.1:18789");
        config.reconnect_delay = Duration::from_millis(20);
        config
    }

    async fn open_client(config: GatewayConfig) -> (GatewayClient, MemoryGateway, GatewaySide) {
        let (connector, mut gateway) = memory_transport();
        let client = GatewayClient::spawn(config, connector);
        let (side, _) = gateway.accept_handshake().await.unwrap();
        client.wait_until_open().await.unwrap();
        (client, gateway, side)
    }

    #[tokio::test]
    async fn test_handshake_identifies_client() {
        let (connector, mut gateway) = memory_transport();
        let mut config = test_config();
        config.token = Some(secrecy::SecretString::from("tok".to_string()));
        let client = GatewayClient::spawn(config, connector);

        let (_side, hello) = gateway.accept_handshake().await.unwrap();
        client.wait_until_open().await.unwrap();

        let params = hello.params.unwrap();
        assert_eq!(params["client"]["id"], "openagent-client");
        assert_eq!(params["auth"]["token"], "tok");
        assert_eq!(params["minProtocol"], 3);
        assert_eq!(client.hello().unwrap()["type"], "hello-ok");
    }

    #[tokio::test]
    async fn test_call_before_open_is_rejected() {
        let (connector, _gateway) = memory_transport();
        let client = GatewayClient::spawn(test_config(), connector);

        let err = client.call("chat.history", None).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_call_resolves_with_payload() {
        let (client, _gateway, mut side) = open_client(test_config()).await;

        let caller = client.clone();
        let call = tokio::spawn(async move {
            caller.call("chat.history", Some(json!({"sessionKey": "main"}))).await
        });

        let req = side.expect_request("chat.history").await.unwrap();
        assert_eq!(req.params.unwrap()["sessionKey"], "main");
        side.respond(&req.id, json!({"messages": []}));

        assert_eq!(call.await.unwrap().unwrap(), json!({"messages": []}));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_rpc_failure_carries_message_and_code() {
        let (client, _gateway, mut side) = open_client(test_config()).await;

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("chat.send", None).await });

        let req = side.expect_request("chat.send").await.unwrap();
        side.fail(&req.id, "rate limited", Some("RATE_LIMITED"));

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
        assert_eq!(err.rpc_code(), Some("RATE_LIMITED"));
    }

    #[tokio::test]
    async fn test_duplicate_response_resolves_once() {
        let (client, _gateway, mut side) = open_client(test_config()).await;
        let mut events = client.subscribe_all();

        let caller = client.clone();
        let first = tokio::spawn(async move { caller.call("a", None).await });
        let req = side.expect_request("a").await.unwrap();
        side.respond(&req.id, json!(1));
        side.respond(&req.id, json!(2));
        assert_eq!(first.await.unwrap().unwrap(), json!(1));

        // The replay was dropped and the connection still works
        side.emit("tick", json!({}));
        assert_eq!(events.recv().await.unwrap().event, "tick");

        let caller = client.clone();
        let second = tokio::spawn(async move { caller.call("b", None).await });
        let req = side.expect_request("b").await.unwrap();
        side.respond(&req.id, json!(3));
        assert_eq!(second.await.unwrap().unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (client, _gateway, side) = open_client(test_config()).await;
        let mut events = client.subscribe("chat");

        side.send_raw("{not json");
        side.send_raw(r#"{"type":"res","id":"nobody","ok":true}"#);
        side.emit("chat", json!({"n": 1}));

        let event = events.recv().await.unwrap();
        assert_eq!(event.payload.unwrap()["n"], 1);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_events_fan_out_in_order_and_filter_by_name() {
        let (client, _gateway, side) = open_client(test_config()).await;
        let mut all = client.subscribe_all();
        let mut chat = client.subscribe("chat");
        let dropped = client.subscribe_all();
        drop(dropped);

        side.emit("chat", json!({"n": 1}));
        side.emit("presence", json!({}));
        side.emit("chat", json!({"n": 2}));

        let names: Vec<String> = vec![
            all.recv().await.unwrap().event,
            all.recv().await.unwrap().event,
            all.recv().await.unwrap().event,
        ];
        assert_eq!(names, vec!["chat", "presence", "chat"]);

        assert_eq!(chat.recv().await.unwrap().payload.unwrap()["n"], 1);
        assert_eq!(chat.recv().await.unwrap().payload.unwrap()["n"], 2);
        assert!(chat.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_to_several_names_keeps_order() {
        let (client, _gateway, side) = open_client(test_config()).await;
        let mut approvals =
            client.subscribe_to(&["exec.approval.requested", "exec.approval.resolved"]);

        side.emit("exec.approval.requested", json!({"id": "a1"}));
        side.emit("chat", json!({}));
        side.emit("exec.approval.resolved", json!({"id": "a1"}));

        assert_eq!(approvals.recv().await.unwrap().event, "exec.approval.requested");
        assert_eq!(approvals.recv().await.unwrap().event, "exec.approval.resolved");
        assert!(approvals.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_sequence_gap_is_counted() {
        let (client, _gateway, side) = open_client(test_config()).await;
        let mut events = client.subscribe_all();

        side.emit_seq("tick", 1, json!({}));
        side.emit_seq("tick", 2, json!({}));
        side.emit_seq("tick", 5, json!({}));
        for _ in 0..3 {
            events.recv().await.unwrap();
        }
        assert_eq!(client.sequence_gaps(), 1);
    }

    #[tokio::test]
    async fn test_sequence_wraparound_keeps_connection_alive() {
        let (client, _gateway, mut side) = open_client(test_config()).await;
        let mut events = client.subscribe_all();

        side.emit_seq("tick", u64::MAX, json!({}));
        side.emit_seq("tick", 1, json!({}));
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv()).await;
            assert!(assert_ok!(event).is_some());
        }
        assert_eq!(client.sequence_gaps(), 0);
        assert_eq!(client.state(), ConnectionState::Open);

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("health", None).await });
        let req = side.expect_request("health").await.unwrap();
        side.respond(&req.id, json!({"ok": true}));
        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_disconnect_rejects_pending_and_reconnects() {
        let (client, mut gateway, mut side) = open_client(test_config()).await;

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("chat.history", None).await });
        side.expect_request("chat.history").await.unwrap();
        drop(side);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed(_)));
        assert_eq!(client.pending_count(), 0);

        // Reconnects after the fixed delay and handshakes again
        let (mut side, _) = gateway.accept_handshake().await.unwrap();
        client.wait_until_open().await.unwrap();

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("ping", None).await });
        let req = side.expect_request("ping").await.unwrap();
        side.respond(&req.id, json!("pong"));
        assert_eq!(call.await.unwrap().unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_retried() {
        let (connector, mut gateway) = memory_transport();
        gateway.refuse_next(2);
        let client = GatewayClient::spawn(test_config(), connector);

        gateway.accept_handshake().await.unwrap();
        assert_ok!(client.wait_until_open().await);
    }

    #[tokio::test]
    async fn test_rejected_handshake_closes_connection() {
        let (connector, mut gateway) = memory_transport();
        let client = GatewayClient::spawn(test_config(), connector);

        let mut side = gateway.accept().await.unwrap();
        let hello = side.expect_request(methods::CONNECT).await.unwrap();
        side.fail(&hello.id, "unauthorized", Some("AUTH_FAILED"));

        // The client hangs up and comes back
        assert!(side.next_frame().await.is_none());
        assert!(!client.is_connected());
        gateway.accept_handshake().await.unwrap();
        client.wait_until_open().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout_removes_pending_entry() {
        let mut config = test_config();
        config.request_timeout = Some(Duration::from_millis(30));
        let (client, _gateway, mut side) = open_client(config).await;

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("slow", None).await });
        side.expect_request("slow").await.unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_pending_and_ends_subscriptions() {
        let (client, _gateway, mut side) = open_client(test_config()).await;
        let mut events = client.subscribe_all();

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("slow", None).await });
        side.expect_request("slow").await.unwrap();

        client.shutdown().await;
        assert!(matches!(
            call.await.unwrap().unwrap_err(),
            Error::ConnectionClosed(_)
        ));
        assert!(events.recv().await.is_none());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(client.call("x", None).await, Err(Error::NotConnected)));
    }
}
