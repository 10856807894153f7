//! In-process transport
//!
//! [`memory_transport`] returns a [`MemoryConnector`] for the client and a
//! [`MemoryGateway`] that accepts each connection the client opens. The
//! gateway side speaks frames directly, which makes it usable as a scripted
//! fake gateway in tests and embeddings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::protocol::{
    methods, ErrorShape, EventFrame, GatewayFrame, RequestFrame, ResponseFrame,
};
use super::transport::{Connection, Connector};
use crate::error::{Error, Result};

/// Client half of the in-process transport
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<GatewaySide>,
    refusals: Arc<AtomicUsize>,
}

/// Gateway half: yields one [`GatewaySide`] per client connection
#[derive(Debug)]
pub struct MemoryGateway {
    accept_rx: mpsc::UnboundedReceiver<GatewaySide>,
    refusals: Arc<AtomicUsize>,
}

/// Gateway end of a single connection. Dropping it closes the connection.
#[derive(Debug)]
pub struct GatewaySide {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

/// Create a connected connector/gateway pair
pub fn memory_transport() -> (MemoryConnector, MemoryGateway) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let refusals = Arc::new(AtomicUsize::new(0));
    (
        MemoryConnector {
            accept_tx,
            refusals: refusals.clone(),
        },
        MemoryGateway {
            accept_rx,
            refusals,
        },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Connection> {
        let pending_refusals = self.refusals.load(Ordering::SeqCst);
        if pending_refusals > 0 {
            self.refusals.store(pending_refusals - 1, Ordering::SeqCst);
            return Err(Error::Transport("connection refused".to_string()));
        }

        let (client_tx, gateway_rx) = mpsc::unbounded_channel();
        let (gateway_tx, client_rx) = mpsc::unbounded_channel();

        self.accept_tx
            .send(GatewaySide {
                from_client: gateway_rx,
                to_client: gateway_tx,
            })
            .map_err(|_| Error::Transport("memory gateway is gone".to_string()))?;

        Ok(Connection {
            outbound: client_tx,
            inbound: client_rx,
        })
    }

    fn endpoint(&self) -> String {
        "memory://gateway".to_string()
    }
}

impl MemoryGateway {
    /// Wait for the client's next connection
    pub async fn accept(&mut self) -> Option<GatewaySide> {
        self.accept_rx.recv().await
    }

    /// Accept a connection and answer its `connect` handshake
    pub async fn accept_handshake(&mut self) -> Option<(GatewaySide, RequestFrame)> {
        let mut side = self.accept().await?;
        let hello = side.expect_request(methods::CONNECT).await?;
        side.respond(&hello.id, json!({"type": "hello-ok", "protocol": 3}));
        Some((side, hello))
    }

    /// Make the next `count` connection attempts fail
    pub fn refuse_next(&self, count: usize) {
        self.refusals.fetch_add(count, Ordering::SeqCst);
    }
}

impl GatewaySide {
    /// Next frame from the client, `None` once it disconnected.
    /// Undecodable text is skipped.
    pub async fn next_frame(&mut self) -> Option<GatewayFrame> {
        loop {
            let text = self.from_client.recv().await?;
            if let Ok(frame) = GatewayFrame::parse(&text) {
                return Some(frame);
            }
        }
    }

    /// Next request from the client
    pub async fn next_request(&mut self) -> Option<RequestFrame> {
        loop {
            if let GatewayFrame::Request(req) = self.next_frame().await? {
                return Some(req);
            }
        }
    }

    /// Next request, which must be for `method`
    pub async fn expect_request(&mut self, method: &str) -> Option<RequestFrame> {
        let req = self.next_request().await?;
        assert_eq!(req.method, method, "unexpected request {:?}", req);
        Some(req)
    }

    /// Non-blocking check for an already-sent request
    pub fn try_next_request(&mut self) -> Option<RequestFrame> {
        while let Ok(text) = self.from_client.try_recv() {
            if let Ok(GatewayFrame::Request(req)) = GatewayFrame::parse(&text) {
                return Some(req);
            }
        }
        None
    }

    /// Send a successful response
    pub fn respond(&self, id: &str, payload: Value) {
        self.send_frame(&GatewayFrame::Response(ResponseFrame::success(id, payload)));
    }

    /// Send a failed response
    pub fn fail(&self, id: &str, message: &str, code: Option<&str>) {
        let mut error = ErrorShape::new(message);
        if let Some(code) = code {
            error = error.with_code(code);
        }
        self.send_frame(&GatewayFrame::Response(ResponseFrame::failure(id, error)));
    }

    /// Push an event
    pub fn emit(&self, event: &str, payload: Value) {
        self.send_frame(&GatewayFrame::Event(EventFrame::new(event, payload)));
    }

    /// Push a sequenced event
    pub fn emit_seq(&self, event: &str, seq: u64, payload: Value) {
        self.send_frame(&GatewayFrame::Event(EventFrame::new(event, payload).with_seq(seq)));
    }

    /// Send arbitrary text, malformed or not
    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.to_client.send(text.into());
    }

    fn send_frame(&self, frame: &GatewayFrame) {
        if let Ok(text) = frame.to_text() {
            let _ = self.to_client.send(text);
        }
    }
}
