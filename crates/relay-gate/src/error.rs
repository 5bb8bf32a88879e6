//! Error types for the permission gate.

use relay_models::{ApprovalId, SessionId, SessionStatus};
use thiserror::Error;

/// Errors that can occur while coordinating approvals.
#[derive(Debug, Error)]
pub enum GateError {
    /// The session already has an unresolved approval.
    #[error("session {session_id} already waits on approval {approval_id}")]
    AlreadyPending {
        session_id: SessionId,
        approval_id: ApprovalId,
    },

    /// No live session with this id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The requested status change is not allowed.
    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// The session already reached a terminal status.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    /// The approval prompt could not be delivered.
    #[error("notification failed: {0}")]
    Notify(String),

    /// Lock poisoned (thread panicked while holding lock).
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
