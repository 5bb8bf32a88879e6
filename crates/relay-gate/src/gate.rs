//! PermissionGate - the suspension point for side-effecting actions.

use std::sync::Arc;
use std::time::Duration;

use relay_models::{
    ActionRequest, ApprovalId, Choice, Decision, DenyReason, PendingApproval, SessionStatus,
};
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::GateConfig;
use crate::error::GateError;
use crate::notify::ApprovalNotifier;
use crate::session::AgentSession;
use crate::store::CorrelationStore;

/// Removes a registered approval if the request future is dropped early.
struct Registration<'a> {
    store: &'a CorrelationStore,
    approval_id: ApprovalId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.store.remove(&self.approval_id);
    }
}

/// Suspends agent actions until a human decides, the deadline passes, or
/// the session is cancelled.
pub struct PermissionGate {
    store: Arc<CorrelationStore>,
    notifier: Arc<dyn ApprovalNotifier>,
    config: GateConfig,
}

impl PermissionGate {
    pub fn new(
        store: Arc<CorrelationStore>,
        notifier: Arc<dyn ApprovalNotifier>,
        config: GateConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Request approval using the configured deadline for the action kind.
    pub async fn request(&self, session: &AgentSession, action: ActionRequest) -> Decision {
        let timeout = self.config.timeout_for(&action);
        self.request_with_timeout(session, action, timeout).await
    }

    /// Request approval for `action` on `session`, waiting at most `timeout`.
    ///
    /// Never fails: every error path resolves to a [`Decision::Denied`].
    pub async fn request_with_timeout(
        &self,
        session: &AgentSession,
        action: ActionRequest,
        timeout: Duration,
    ) -> Decision {
        if session.is_cancelled() {
            return Decision::Denied(DenyReason::Cancelled);
        }

        if session.status().is_terminal() {
            let e = GateError::SessionClosed(session.id().clone());
            warn!(session_id = %session.id(), tool = %action.tool_name, "approval requested after session end");
            return Decision::Denied(DenyReason::Policy(e.to_string()));
        }

        if session.approve_all_enabled() && self.config.yolo.covers(&action) {
            debug!(
                session_id = %session.id(),
                tool = %action.tool_name,
                "auto-approved under approve-all"
            );
            return Decision::Approved { auto: true };
        }

        let pending = PendingApproval::new(session.id().clone(), action);
        let mut rx = match self.store.register(pending.clone()) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "cannot register approval");
                return Decision::Denied(DenyReason::Policy(e.to_string()));
            }
        };
        let _registration = Registration {
            store: &self.store,
            approval_id: pending.approval_id.clone(),
        };

        if let Err(e) = session.transition(SessionStatus::AwaitingApproval) {
            debug!(session_id = %session.id(), error = %e, "status not updated");
        }

        info!(
            session_id = %session.id(),
            approval_id = %pending.approval_id,
            tool = %pending.action.tool_name,
            risk = %pending.action.risk,
            timeout_secs = timeout.as_secs(),
            "approval requested"
        );

        // The deadline and cancellation also bound delivery of the prompt.
        // A decision that arrives mid-delivery waits in `rx`.
        let deadline = Instant::now() + timeout;
        let decision = tokio::select! {
            biased;

            _ = session.cancelled() => {
                self.store.remove(&pending.approval_id);
                Decision::Denied(DenyReason::Cancelled)
            }
            delivered = self.notifier.approval_requested(&pending) => match delivered {
                Ok(()) => self.wait(session, &pending, &mut rx, deadline).await,
                Err(e) => {
                    warn!(approval_id = %pending.approval_id, error = %e, "could not deliver approval prompt");
                    self.store.remove(&pending.approval_id);
                    Decision::Denied(DenyReason::Unreachable)
                }
            },
            _ = sleep_until(deadline) => self.expire(session, &pending, &mut rx),
        };

        if session.status() == SessionStatus::AwaitingApproval {
            let _ = session.transition(SessionStatus::Running);
        }

        info!(
            session_id = %session.id(),
            approval_id = %pending.approval_id,
            outcome = decision.label(),
            "approval closed"
        );
        self.notifier.approval_closed(&pending, &decision).await;
        decision
    }

    async fn wait(
        &self,
        session: &AgentSession,
        pending: &PendingApproval,
        rx: &mut oneshot::Receiver<Choice>,
        deadline: Instant,
    ) -> Decision {
        let approval_id = &pending.approval_id;

        tokio::select! {
            biased;

            _ = session.cancelled() => {
                self.store.remove(approval_id);
                Decision::Denied(DenyReason::Cancelled)
            }
            received = &mut *rx => match received {
                Ok(choice) => self.apply(session, choice),
                // Entry dropped without a decision (store cleared on shutdown).
                Err(_) => Decision::Denied(DenyReason::Cancelled),
            },
            _ = sleep_until(deadline) => self.expire(session, pending, rx),
        }
    }

    /// Deadline reached: deny, unless a resolver won the race.
    fn expire(
        &self,
        session: &AgentSession,
        pending: &PendingApproval,
        rx: &mut oneshot::Receiver<Choice>,
    ) -> Decision {
        let approval_id = &pending.approval_id;
        if self.store.remove(approval_id).is_some() {
            warn!(
                session_id = %session.id(),
                approval_id = %approval_id,
                "approval timed out"
            );
            Decision::Denied(DenyReason::Timeout)
        } else {
            // A resolver removed the entry first; its decision stands.
            match rx.try_recv() {
                Ok(choice) => self.apply(session, choice),
                Err(_) => Decision::Denied(DenyReason::Cancelled),
            }
        }
    }

    fn apply(&self, session: &AgentSession, choice: Choice) -> Decision {
        if choice == Choice::ApproveAll {
            session.enable_approve_all();
        }
        choice.into_decision()
    }
}
