//! Gateway Protocol - WebSocket-based control plane
//!
//! ## Protocol Overview
//!
//! - **JSON frames**, one per WebSocket text message
//! - **Request-response pattern** correlated by unique request IDs
//! - **Event streaming** for pushed updates (chat deltas, approval prompts)
//!
//! ## Frame Types
//!
//! - `req`: Client-initiated requests
//! - `res`: Gateway responses to requests (`ok` + payload or error)
//! - `event`: Gateway-pushed events, optionally sequenced

pub mod schema;
pub mod types;

pub use schema::{ErrorShape, EventFrame, GatewayFrame, RequestFrame, ResponseFrame};
pub use types::*;
