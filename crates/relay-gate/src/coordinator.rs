//! Coordinator - owns the store, gate and session registry.
//!
//! One instance per process, shared (`Arc`) between the agent task path and
//! the chat handlers that deliver decisions and cancellations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use relay_models::{SessionId, SessionStatus};
use relay_stream::OutputStream;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::GateConfig;
use crate::decision::DecisionChannel;
use crate::error::{GateError, Result};
use crate::gate::PermissionGate;
use crate::notify::ApprovalNotifier;
use crate::session::AgentSession;
use crate::store::CorrelationStore;

/// Process-wide HITL coordination object.
pub struct Coordinator {
    store: Arc<CorrelationStore>,
    gate: Arc<PermissionGate>,
    decisions: DecisionChannel,
    sessions: RwLock<HashMap<SessionId, Arc<AgentSession>>>,
}

impl Coordinator {
    /// Creates a coordinator that notifies approval requests through `notifier`.
    pub fn new(config: GateConfig, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        let store = Arc::new(CorrelationStore::new());
        let gate = Arc::new(PermissionGate::new(Arc::clone(&store), notifier, config));
        let decisions = DecisionChannel::new(Arc::clone(&store));
        Self {
            store,
            gate,
            decisions,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn gate(&self) -> Arc<PermissionGate> {
        Arc::clone(&self.gate)
    }

    pub fn decisions(&self) -> &DecisionChannel {
        &self.decisions
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.store
    }

    pub fn config(&self) -> &GateConfig {
        self.gate.config()
    }

    /// Register a new running session.
    pub async fn start_session(
        &self,
        working_dir: impl Into<PathBuf>,
    ) -> (Arc<AgentSession>, OutputStream) {
        let (session, stream) = AgentSession::new(working_dir);
        let session = Arc::new(session);
        self.sessions
            .write()
            .await
            .insert(session.id().clone(), Arc::clone(&session));
        info!(
            session_id = %session.id(),
            working_dir = %session.working_dir().display(),
            "session started"
        );
        (session, stream)
    }

    /// Look up a live session.
    pub async fn session(&self, session_id: &SessionId) -> Option<Arc<AgentSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cancel a session, unblocking any approval it waits on.
    ///
    /// Returns false if the session had already finished.
    pub async fn cancel(&self, session_id: &SessionId) -> Result<bool> {
        let session = self
            .session(session_id)
            .await
            .ok_or_else(|| GateError::SessionNotFound(session_id.clone()))?;
        let cancelled = session.cancel();
        if cancelled {
            info!(session_id = %session_id, "session cancelled by user");
        }
        Ok(cancelled)
    }

    /// Revoke approve-all on a live session.
    pub async fn revoke_approve_all(&self, session_id: &SessionId) -> Result<bool> {
        let session = self
            .session(session_id)
            .await
            .ok_or_else(|| GateError::SessionNotFound(session_id.clone()))?;
        Ok(session.revoke_approve_all())
    }

    /// Move a session to a terminal status and drop it from the registry.
    ///
    /// Returns true if this call performed the terminal transition.
    pub async fn end_session(&self, session_id: &SessionId, status: SessionStatus) -> bool {
        let Some(session) = self.sessions.write().await.remove(session_id) else {
            return false;
        };
        if let Some(pending) = self.store.pending_for_session(session_id) {
            self.store.remove(&pending.approval_id);
        }
        session.finish(status)
    }

    /// Cancel every live session and forget all pending approvals.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<AgentSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.cancel();
        }
        let dropped = self.store.clear();
        info!(sessions = sessions.len(), approvals = dropped, "coordinator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;

    fn coordinator() -> Coordinator {
        let (notifier, _events) = ChannelNotifier::new();
        Coordinator::new(GateConfig::default(), Arc::new(notifier))
    }

    #[tokio::test]
    async fn test_start_and_lookup() {
        let coord = coordinator();
        let (session, _stream) = coord.start_session("/work").await;

        let found = coord.session(session.id()).await.unwrap();
        assert_eq!(found.id(), session.id());
        assert_eq!(coord.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_session() {
        let coord = coordinator();
        let err = coord.cancel(&SessionId::new()).await.unwrap_err();
        assert!(matches!(err, GateError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_then_end() {
        let coord = coordinator();
        let (session, _stream) = coord.start_session(".").await;

        assert!(coord.cancel(session.id()).await.unwrap());
        assert!(!coord.cancel(session.id()).await.unwrap());
        assert!(!coord.end_session(session.id(), SessionStatus::Cancelled).await);
        assert_eq!(coord.session_count().await, 0);
        assert_eq!(session.status(), SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_end_session_once() {
        let coord = coordinator();
        let (session, _stream) = coord.start_session(".").await;

        assert!(coord.end_session(session.id(), SessionStatus::Completed).await);
        assert!(!coord.end_session(session.id(), SessionStatus::Failed).await);
        assert_eq!(session.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_revoke_approve_all() {
        let coord = coordinator();
        let (session, _stream) = coord.start_session(".").await;
        session.enable_approve_all();

        assert!(coord.revoke_approve_all(session.id()).await.unwrap());
        assert!(!session.approve_all_enabled());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything() {
        let coord = coordinator();
        let (a, _sa) = coord.start_session(".").await;
        let (b, _sb) = coord.start_session(".").await;

        coord.shutdown().await;
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert_eq!(coord.session_count().await, 0);
    }
}
