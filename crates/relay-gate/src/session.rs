//! AgentSession - one in-flight agent run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use relay_models::{SessionId, SessionStatus};
use relay_stream::{output_channel, OutputSink, OutputStream};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cancel::CancelFlag;
use crate::error::{GateError, Result};

/// State of a single agent run: status, cancellation flag, output sink and
/// the session-level approve-all grant.
#[derive(Debug)]
pub struct AgentSession {
    id: SessionId,
    working_dir: PathBuf,
    created_at: DateTime<Utc>,
    cancel: CancelFlag,
    output: OutputSink,
    status: watch::Sender<SessionStatus>,
    approve_all: AtomicBool,
}

impl AgentSession {
    /// Creates a running session and the output stream its relay will drain.
    pub fn new(working_dir: impl Into<PathBuf>) -> (Self, OutputStream) {
        let id = SessionId::new();
        let (output, stream) = output_channel(id.clone());
        let (status, _) = watch::channel(SessionStatus::Running);
        let session = Self {
            id,
            working_dir: working_dir.into(),
            created_at: Utc::now(),
            cancel: CancelFlag::new(),
            output,
            status,
            approve_all: AtomicBool::new(false),
        };
        (session, stream)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The session's output sink.
    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    /// Emit output unless the session was cancelled.
    pub fn emit(&self, text: impl Into<String>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.output.emit(text)
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Move to `to`, rejecting transitions the state machine does not allow.
    pub fn transition(&self, to: SessionStatus) -> Result<()> {
        let mut outcome = Ok(());
        self.status.send_if_modified(|current| {
            if current.can_transition_to(to) {
                debug!(session_id = %self.id, from = %current, to = %to, "session transition");
                *current = to;
                true
            } else {
                outcome = Err(GateError::InvalidTransition { from: *current, to });
                false
            }
        });
        outcome
    }

    /// Move into a terminal status. Returns true only for the first terminal
    /// transition, so callers can report the outcome exactly once.
    pub fn finish(&self, status: SessionStatus) -> bool {
        if !status.is_terminal() {
            return false;
        }
        if status == SessionStatus::Cancelled {
            self.cancel.cancel();
        }
        let finished = self.transition(status).is_ok();
        if finished {
            info!(session_id = %self.id, status = %status, "session finished");
        }
        finished
    }

    /// Cancel the session. Wakes any gate request suspended on it.
    ///
    /// Returns true if the session was live and is now cancelled.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel();
        self.finish(SessionStatus::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the session is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// A clone of the cancellation flag for code that outlives a borrow.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn approve_all_enabled(&self) -> bool {
        self.approve_all.load(Ordering::SeqCst)
    }

    /// Approve every later gated action on this session.
    pub fn enable_approve_all(&self) {
        if !self.approve_all.swap(true, Ordering::SeqCst) {
            info!(session_id = %self.id, "approve-all enabled");
        }
    }

    /// Revoke approve-all. Returns true if it was enabled.
    pub fn revoke_approve_all(&self) -> bool {
        let was = self.approve_all.swap(false, Ordering::SeqCst);
        if was {
            info!(session_id = %self.id, "approve-all revoked");
        }
        was
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_running() {
        let (session, _stream) = AgentSession::new("/tmp/project");
        assert_eq!(session.status(), SessionStatus::Running);
        assert_eq!(session.working_dir(), Path::new("/tmp/project"));
        assert_eq!(session.output().session_id(), session.id());
        assert!(!session.is_cancelled());
        assert!(!session.approve_all_enabled());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let (session, _stream) = AgentSession::new(".");
        session.transition(SessionStatus::AwaitingApproval).unwrap();
        let err = session.transition(SessionStatus::Completed).unwrap_err();
        assert!(matches!(
            err,
            GateError::InvalidTransition {
                from: SessionStatus::AwaitingApproval,
                to: SessionStatus::Completed
            }
        ));
        assert_eq!(session.status(), SessionStatus::AwaitingApproval);
    }

    #[test]
    fn test_finish_only_once() {
        let (session, _stream) = AgentSession::new(".");
        assert!(session.finish(SessionStatus::Failed));
        assert!(!session.finish(SessionStatus::Completed));
        assert!(!session.cancel());
        assert_eq!(session.status(), SessionStatus::Failed);
    }

    #[test]
    fn test_finish_rejects_live_status() {
        let (session, _stream) = AgentSession::new(".");
        assert!(!session.finish(SessionStatus::AwaitingApproval));
        assert_eq!(session.status(), SessionStatus::Running);
    }

    #[test]
    fn test_cancel_sets_flag_and_status() {
        let (session, _stream) = AgentSession::new(".");
        session.transition(SessionStatus::AwaitingApproval).unwrap();
        assert!(session.cancel());
        assert!(session.is_cancelled());
        assert_eq!(session.status(), SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_emit_stops_after_cancel() {
        let (session, mut stream) = AgentSession::new(".");
        assert!(session.emit("before"));
        session.cancel();
        assert!(!session.emit("after"));

        let chunk = stream.recv().await.unwrap();
        assert_eq!(chunk.text, "before");
    }

    #[test]
    fn test_approve_all_toggle() {
        let (session, _stream) = AgentSession::new(".");
        session.enable_approve_all();
        assert!(session.approve_all_enabled());
        assert!(session.revoke_approve_all());
        assert!(!session.revoke_approve_all());
    }

    #[tokio::test]
    async fn test_status_subscription() {
        let (session, _stream) = AgentSession::new(".");
        let mut rx = session.subscribe_status();
        session.transition(SessionStatus::AwaitingApproval).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionStatus::AwaitingApproval);
    }
}
