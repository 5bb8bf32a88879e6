//! The agent runtime boundary.
//!
//! A runtime executes one task inside an [`AgentSession`], writing progress
//! into the session's output and asking the [`PermissionGate`] before every
//! side-effecting tool call. [`ClaudeCli`](crate::ClaudeCli) is the
//! production implementation; tests substitute scripted runtimes.

use std::sync::Arc;

use async_trait::async_trait;
use relay_gate::{AgentSession, PermissionGate};

use crate::error::Result;

/// A unit of work for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTask {
    /// The user's instruction.
    pub prompt: String,
    /// Conversation to continue, if any.
    pub resume: Option<String>,
    /// Start the session with approve-all already on.
    pub approve_all: bool,
}

impl AgentTask {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            resume: None,
            approve_all: false,
        }
    }

    /// Continue an earlier conversation.
    pub fn with_resume(mut self, conversation_id: impl Into<String>) -> Self {
        self.resume = Some(conversation_id.into());
        self
    }

    pub fn with_approve_all(mut self, approve_all: bool) -> Self {
        self.approve_all = approve_all;
        self
    }
}

/// What a successful run reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Conversation id to resume later.
    pub conversation_id: Option<String>,
    /// Final result text.
    pub result: Option<String>,
    pub cost_usd: Option<f64>,
    pub num_turns: Option<u32>,
    pub duration_ms: Option<u64>,
}

/// Executes agent tasks.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Run `task` to completion.
    ///
    /// Must return [`AgentError::Cancelled`](crate::AgentError::Cancelled)
    /// promptly once the session is cancelled.
    async fn run(
        &self,
        task: AgentTask,
        session: Arc<AgentSession>,
        gate: Arc<PermissionGate>,
    ) -> Result<RunSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = AgentTask::new("fix the build")
            .with_resume("conv-9")
            .with_approve_all(true);
        assert_eq!(task.prompt, "fix the build");
        assert_eq!(task.resume.as_deref(), Some("conv-9"));
        assert!(task.approve_all);
    }
}
