//! Error types for agent runs.

use thiserror::Error;

/// Errors raised while running an agent task.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The agent process could not be started.
    #[error("Failed to start agent: {0}")]
    Spawn(String),

    /// IO error talking to the agent process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The agent sent something the relay cannot interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The agent finished with an error result.
    #[error("Agent error: {0}")]
    Backend(String),

    /// The agent stopped before reporting a result.
    #[error("Agent exited early: {0}")]
    ExitedEarly(String),

    /// The session was cancelled by the user.
    #[error("Task cancelled")]
    Cancelled,
}

impl AgentError {
    /// Returns true if the run ended because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
