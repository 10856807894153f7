//! Transport layer
//!
//! A [`Connector`] opens one connection to the gateway and hands it back as a
//! pair of text-frame channels. The correlator owns the connection from then
//! on; closing either channel ends it.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// One open connection, seen as text frames
#[derive(Debug)]
pub struct Connection {
    /// Frames to the gateway. Dropping it closes the connection.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames from the gateway. Yields `None` once the connection is gone.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens connections to the gateway
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a fresh connection
    async fn connect(&self) -> Result<Connection>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// WebSocket connector
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: url::Url,
}

impl WsConnector {
    /// Create a connector for a `ws://` or `wss://` endpoint
    pub fn new(url: &str) -> Result<Self> {
        let url = url::Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(WsConnector { url }),
            other => Err(Error::Config(format!(
                "Unsupported gateway URL scheme '{}', expected ws or wss",
                other
            ))),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                trace!(len = text.len(), "ws send");
                if let Err(err) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %err, "WebSocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            if inbound_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Err(_) => debug!("Dropping non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Gateway sent close frame");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "WebSocket receive failed");
                        break;
                    }
                }
            }
        });

        Ok(Connection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}
