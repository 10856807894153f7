//! Exec approvals
//!
//! The gateway asks before running certain commands. Prompts queue up here
//! and are answered head first.

pub mod coordinator;
pub mod queue;

pub use coordinator::{ApprovalSnapshot, ExecApprovalCoordinator};
pub use queue::{format_remaining, ApprovalDecision, ApprovalQueue, ExecApprovalRequest};
