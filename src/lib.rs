//! # OpenAgent client
//!
//! Client-side protocol runtime for the OpenAgent gateway.
//!
//! ## Features
//!
//! - **Frame correlation:** one persistent WebSocket, requests matched to
//!   responses by id, pushed events fanned out to subscribers
//! - **Chat runs:** one active run per session, streamed deltas, queued
//!   follow-ups drained in order
//! - **Exec approvals:** gateway prompts queued and decided head first
//! - **Automatic reconnect:** fixed delay, handshake repeated on each connection

pub mod approvals;
pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;

pub use config::Config;
pub use error::{Error, Result};
pub use gateway::GatewayClient;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
