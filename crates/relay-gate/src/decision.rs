//! DecisionChannel - delivers human decisions to suspended gate requests.

use std::sync::Arc;

use relay_models::{ApprovalId, Choice, PendingApproval};
use tracing::{info, warn};

use crate::store::CorrelationStore;

/// Inbound side of the gate, used by chat handlers.
#[derive(Clone)]
pub struct DecisionChannel {
    store: Arc<CorrelationStore>,
}

impl DecisionChannel {
    pub fn new(store: Arc<CorrelationStore>) -> Self {
        Self { store }
    }

    /// Deliver `choice` to the request waiting on `approval_id`.
    ///
    /// Returns false, with no other effect, when the id is unknown, expired
    /// or already resolved. The first of several concurrent calls wins.
    pub fn resolve(&self, approval_id: &ApprovalId, choice: Choice) -> bool {
        let label = choice.label();
        match self.store.resolve(approval_id, choice) {
            Some(approval) => {
                info!(
                    approval_id = %approval_id,
                    session_id = %approval.session_id,
                    decision = label,
                    "approval resolved"
                );
                true
            }
            None => {
                warn!(approval_id = %approval_id, "stale approval decision ignored");
                false
            }
        }
    }

    /// Look at a pending approval without resolving it.
    pub fn pending(&self, approval_id: &ApprovalId) -> Option<PendingApproval> {
        self.store.get(approval_id)
    }
}
