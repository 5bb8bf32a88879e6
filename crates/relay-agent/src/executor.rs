//! TaskExecutor - runs one agent task per session.
//!
//! Concurrency patterns:
//! - each task gets two tokio tasks: the runtime and the [`StreamRelay`]
//!   draining its output
//! - the terminal status is applied through
//!   [`Coordinator::end_session`], which succeeds at most once per session
//! - the final output chunk is emitted after the terminal transition, so the
//!   relay always ends and the presenter sees exactly one final batch

use std::path::PathBuf;
use std::sync::Arc;

use relay_core::PermissionMode;
use relay_gate::{AgentSession, Coordinator};
use relay_models::{SessionId, SessionStatus};
use relay_stream::{OutputPresenter, RelayStats, StreamConfig, StreamRelay};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::AgentError;
use crate::runtime::{AgentRuntime, AgentTask, RunSummary};

/// Outcome of one task, produced exactly once per session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub summary: RunSummary,
    /// Error message for failed runs.
    pub error: Option<String>,
    /// Whether approve-all was on when the session ended.
    pub approve_all: bool,
    pub relay: RelayStats,
}

impl SessionReport {
    /// Conversation id to resume from.
    pub fn conversation_id(&self) -> Option<&str> {
        self.summary.conversation_id.as_deref()
    }
}

/// Starts agent tasks and reports their outcome.
pub struct TaskExecutor {
    coordinator: Arc<Coordinator>,
    runtime: Arc<dyn AgentRuntime>,
    stream_config: StreamConfig,
    permission_mode: PermissionMode,
}

impl TaskExecutor {
    pub fn new(coordinator: Arc<Coordinator>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            coordinator,
            runtime,
            stream_config: StreamConfig::default(),
            permission_mode: PermissionMode::Default,
        }
    }

    /// Sets the output streaming configuration.
    pub fn with_stream_config(mut self, config: StreamConfig) -> Self {
        self.stream_config = config;
        self
    }

    /// Sets the permission mode; `BypassPermissions` starts every session
    /// with approve-all on.
    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Start `task` in `working_dir`, streaming output to `presenter`.
    ///
    /// Returns the live session (for cancellation and status) and a handle
    /// resolving to the session's report.
    pub async fn spawn(
        &self,
        task: AgentTask,
        working_dir: impl Into<PathBuf>,
        presenter: Arc<dyn OutputPresenter>,
    ) -> (Arc<AgentSession>, JoinHandle<SessionReport>) {
        self.spawn_with(task, working_dir, move |_| presenter).await
    }

    /// Like [`spawn`](Self::spawn), building the presenter from the new
    /// session's id. `make_presenter` runs before the agent starts.
    pub async fn spawn_with<F>(
        &self,
        task: AgentTask,
        working_dir: impl Into<PathBuf>,
        make_presenter: F,
    ) -> (Arc<AgentSession>, JoinHandle<SessionReport>)
    where
        F: FnOnce(&SessionId) -> Arc<dyn OutputPresenter>,
    {
        let (session, stream) = self.coordinator.start_session(working_dir).await;
        if task.approve_all || self.permission_mode == PermissionMode::BypassPermissions {
            session.enable_approve_all();
        }

        let presenter = make_presenter(session.id());
        let relay = StreamRelay::new(self.stream_config.clone(), presenter);
        let relay_handle = tokio::spawn(async move { relay.run(stream).await });

        let coordinator = Arc::clone(&self.coordinator);
        let runtime = Arc::clone(&self.runtime);
        let run_session = Arc::clone(&session);

        let handle = tokio::spawn(async move {
            let session = run_session;
            info!(
                session_id = %session.id(),
                runtime = runtime.name(),
                resume = task.resume.is_some(),
                "task started"
            );

            let outcome = runtime
                .run(task, Arc::clone(&session), coordinator.gate())
                .await;

            let (status, summary, error) = match outcome {
                Ok(summary) if !session.is_cancelled() => (SessionStatus::Completed, summary, None),
                Ok(summary) => (SessionStatus::Cancelled, summary, None),
                Err(AgentError::Cancelled) => (SessionStatus::Cancelled, RunSummary::default(), None),
                Err(e) if session.is_cancelled() => {
                    warn!(session_id = %session.id(), error = %e, "error after cancellation");
                    (SessionStatus::Cancelled, RunSummary::default(), None)
                }
                Err(e) => {
                    error!(session_id = %session.id(), error = %e, "task failed");
                    (SessionStatus::Failed, RunSummary::default(), Some(e.to_string()))
                }
            };

            coordinator.end_session(session.id(), status).await;
            session.output().finish("");

            let relay = match relay_handle.await {
                Ok(stats) => stats,
                Err(e) => {
                    error!(session_id = %session.id(), error = %e, "output relay panicked");
                    RelayStats::default()
                }
            };

            let report = SessionReport {
                session_id: session.id().clone(),
                status: session.status(),
                summary,
                error,
                approve_all: session.approve_all_enabled(),
                relay,
            };
            info!(
                session_id = %report.session_id,
                status = %report.status,
                batches = report.relay.batches_sent,
                "task finished"
            );
            report
        });

        (session, handle)
    }
}
