//! Core data models for Claude Relay.
//!
//! This crate provides the plain data types shared by every layer of the
//! relay: identifiers, session status, approval records and decisions, and
//! the output chunks that flow from the agent to the chat transport.

pub mod approval;
pub mod ids;
pub mod output;
pub mod session;

// Re-export main types
pub use approval::{
    ActionKind, ActionRequest, Choice, Decision, DenyReason, PendingApproval, Resolution,
    RiskLevel,
};
pub use ids::{ApprovalId, SessionId};
pub use output::{OutputBatch, OutputChunk};
pub use session::SessionStatus;
