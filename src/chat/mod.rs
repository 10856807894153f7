//! Chat runs
//!
//! One coordinator per session drives a conversational turn through
//! `chat.send`, the streamed `chat` events and `chat.abort`, deferring any
//! message composed mid-run to an outbound queue.

pub mod coordinator;
pub mod message;
pub mod queue;
pub mod state;

pub use coordinator::{is_stop_command, ChatCoordinator, ChatHandle, ChatSnapshot, SendOutcome};
pub use message::{extract_text, Attachment, ChatMessage, ContentBlock};
pub use queue::{OutboundQueue, QueuedMessage};
pub use state::{ChatRunState, RunPhase};
