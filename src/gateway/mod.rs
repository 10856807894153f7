//! Gateway module - client side of the WebSocket control plane
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ ChatHandle   │   │ ExecApproval     │   │ CLI / embedder│
//! │              │   │ Coordinator      │   │               │
//! └──────┬───────┘   └────────┬─────────┘   └───────┬───────┘
//!        │   call / subscribe │                     │
//!        └──────────────┬─────┴─────────────────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │  GatewayClient  │  pending table, event fan-out,
//!              │  (correlator)   │  handshake, reconnect
//!              └────────┬────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │   Connector     │  WebSocket or in-memory
//!              └─────────────────┘
//! ```

pub mod client;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod protocol;
pub mod transport;

pub use client::{ConnectionState, GatewayClient, Subscription};
pub use protocol::{events, methods, EventFrame, GatewayFrame, RequestFrame, ResponseFrame};
pub use transport::{Connection, Connector, WsConnector};
