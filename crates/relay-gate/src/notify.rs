//! Side channel from the gate to the presentation layer.

use async_trait::async_trait;
use relay_models::{Decision, PendingApproval};
use tokio::sync::mpsc;

use crate::error::{GateError, Result};

/// Receives "approval needed" notifications from the gate.
///
/// `approval_requested` is called exactly once per suspended request. An
/// error means the human cannot be asked, and the gate denies the action.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn approval_requested(&self, approval: &PendingApproval) -> Result<()>;

    /// Called after the gate returns, whatever the outcome.
    async fn approval_closed(&self, _approval: &PendingApproval, _decision: &Decision) {}
}

/// Gate notifications as plain values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    ApprovalRequested(PendingApproval),
    ApprovalClosed {
        approval: PendingApproval,
        decision: Decision,
    },
}

/// Forwards gate notifications into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<GateEvent>,
}

impl ChannelNotifier {
    /// Creates a notifier and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ApprovalNotifier for ChannelNotifier {
    async fn approval_requested(&self, approval: &PendingApproval) -> Result<()> {
        self.tx
            .send(GateEvent::ApprovalRequested(approval.clone()))
            .map_err(|_| GateError::Notify("event receiver dropped".to_string()))
    }

    async fn approval_closed(&self, approval: &PendingApproval, decision: &Decision) {
        let _ = self.tx.send(GateEvent::ApprovalClosed {
            approval: approval.clone(),
            decision: decision.clone(),
        });
    }
}
