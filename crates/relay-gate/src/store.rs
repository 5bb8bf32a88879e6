//! CorrelationStore - pending approvals keyed by approval id.
//!
//! Concurrency patterns:
//! - a single `std::sync::Mutex` guards both maps, so check-and-register and
//!   check-and-resolve are atomic with respect to each other
//! - the lock is never held across an `.await`; waiters suspend on a
//!   `oneshot::Receiver` handed out at registration
//! - removing an entry is the linearization point: whoever removes it
//!   (resolver, timeout, cancellation) decides the outcome

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use relay_models::{ApprovalId, Choice, PendingApproval, SessionId};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::{GateError, Result};

struct Slot {
    approval: PendingApproval,
    waker: oneshot::Sender<Choice>,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<ApprovalId, Slot>,
    by_session: HashMap<SessionId, ApprovalId>,
}

/// Maps approval ids to suspended gate requests.
///
/// # Example
///
/// ```
/// use relay_gate::CorrelationStore;
/// use relay_models::{ActionRequest, Choice, PendingApproval, SessionId};
///
/// let store = CorrelationStore::new();
/// let pending = PendingApproval::new(SessionId::new(), ActionRequest::new("Bash", "ls"));
/// let id = pending.approval_id.clone();
///
/// let mut rx = store.register(pending).unwrap();
/// assert!(store.resolve(&id, Choice::Approve).is_some());
/// assert_eq!(rx.try_recv().unwrap(), Choice::Approve);
/// assert!(store.is_empty());
/// ```
#[derive(Default)]
pub struct CorrelationStore {
    inner: Mutex<Inner>,
}

impl CorrelationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| GateError::LockPoisoned(e.to_string()))
    }

    /// Registers an unresolved approval and returns the receiver its
    /// decision will be delivered on.
    ///
    /// Fails if the session already has an unresolved approval.
    pub fn register(&self, approval: PendingApproval) -> Result<oneshot::Receiver<Choice>> {
        let mut inner = self.lock()?;

        if let Some(existing) = inner.by_session.get(&approval.session_id) {
            return Err(GateError::AlreadyPending {
                session_id: approval.session_id.clone(),
                approval_id: existing.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        let id = approval.approval_id.clone();
        inner
            .by_session
            .insert(approval.session_id.clone(), id.clone());
        inner.slots.insert(
            id,
            Slot {
                approval,
                waker: tx,
            },
        );
        Ok(rx)
    }

    /// Resolves an approval and wakes its waiter.
    ///
    /// Returns the resolved record, or `None` if the id is unknown, already
    /// resolved, expired, or its waiter has gone away.
    pub fn resolve(&self, approval_id: &ApprovalId, choice: Choice) -> Option<PendingApproval> {
        let slot = match self.lock() {
            Ok(mut inner) => inner.take(approval_id)?,
            Err(e) => {
                error!(error = %e, "correlation store unavailable");
                return None;
            }
        };

        let mut approval = slot.approval;
        approval.resolution = choice.resolution();
        match slot.waker.send(choice) {
            Ok(()) => Some(approval),
            Err(_) => {
                debug!(approval_id = %approval_id, "approval waiter already gone");
                None
            }
        }
    }

    /// Removes an approval without resolving it (timeout, cancellation).
    ///
    /// The waiter's receiver is closed without a value.
    pub fn remove(&self, approval_id: &ApprovalId) -> Option<PendingApproval> {
        let mut inner = self.lock().ok()?;
        inner.take(approval_id).map(|slot| slot.approval)
    }

    /// Returns a copy of an unresolved approval.
    pub fn get(&self, approval_id: &ApprovalId) -> Option<PendingApproval> {
        let inner = self.lock().ok()?;
        inner.slots.get(approval_id).map(|s| s.approval.clone())
    }

    /// Returns the unresolved approval for a session, if any.
    pub fn pending_for_session(&self, session_id: &SessionId) -> Option<PendingApproval> {
        let inner = self.lock().ok()?;
        let id = inner.by_session.get(session_id)?;
        inner.slots.get(id).map(|s| s.approval.clone())
    }

    /// Number of unresolved approvals.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.slots.len()).unwrap_or(0)
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every pending approval; their waiters observe a closed channel.
    pub fn clear(&self) -> usize {
        match self.lock() {
            Ok(mut inner) => {
                let count = inner.slots.len();
                inner.slots.clear();
                inner.by_session.clear();
                count
            }
            Err(_) => 0,
        }
    }
}

impl Inner {
    fn take(&mut self, approval_id: &ApprovalId) -> Option<Slot> {
        let slot = self.slots.remove(approval_id)?;
        if self.by_session.get(&slot.approval.session_id) == Some(approval_id) {
            self.by_session.remove(&slot.approval.session_id);
        }
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_models::{ActionRequest, Resolution};

    fn pending(session: &SessionId) -> PendingApproval {
        PendingApproval::new(session.clone(), ActionRequest::new("Write", "write a.txt"))
    }

    #[test]
    fn test_register_and_resolve() {
        let store = CorrelationStore::new();
        let session = SessionId::new();
        let approval = pending(&session);
        let id = approval.approval_id.clone();

        let mut rx = store.register(approval).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.pending_for_session(&session).is_some());

        let resolved = store.resolve(&id, Choice::ApproveAll).unwrap();
        assert_eq!(resolved.resolution, Resolution::ApprovedAll);
        assert_eq!(rx.try_recv().unwrap(), Choice::ApproveAll);
        assert!(store.is_empty());
        assert!(store.pending_for_session(&session).is_none());
    }

    #[test]
    fn test_one_pending_per_session() {
        let store = CorrelationStore::new();
        let session = SessionId::new();
        let first = pending(&session);
        let first_id = first.approval_id.clone();

        let _rx = store.register(first).unwrap();
        let err = store.register(pending(&session)).unwrap_err();
        match err {
            GateError::AlreadyPending { approval_id, .. } => assert_eq!(approval_id, first_id),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = CorrelationStore::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let pa = pending(&a);
        let pb = pending(&b);
        let a_id = pa.approval_id.clone();

        let _ra = store.register(pa).unwrap();
        let mut rb = store.register(pb).unwrap();

        store.resolve(&a_id, Choice::Deny);
        assert!(store.pending_for_session(&b).is_some());
        assert!(rb.try_recv().is_err());
    }

    #[test]
    fn test_resolve_unknown_id() {
        let store = CorrelationStore::new();
        assert!(store
            .resolve(&ApprovalId::from_string("nonexistent-id"), Choice::Approve)
            .is_none());
    }

    #[test]
    fn test_second_resolve_is_stale() {
        let store = CorrelationStore::new();
        let approval = pending(&SessionId::new());
        let id = approval.approval_id.clone();
        let _rx = store.register(approval).unwrap();

        assert!(store.resolve(&id, Choice::Approve).is_some());
        assert!(store.resolve(&id, Choice::Deny).is_none());
    }

    #[test]
    fn test_remove_closes_receiver() {
        let store = CorrelationStore::new();
        let approval = pending(&SessionId::new());
        let id = approval.approval_id.clone();
        let mut rx = store.register(approval).unwrap();

        assert!(store.remove(&id).is_some());
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(store.resolve(&id, Choice::Approve).is_none());
    }

    #[test]
    fn test_resolve_with_dropped_waiter() {
        let store = CorrelationStore::new();
        let approval = pending(&SessionId::new());
        let id = approval.approval_id.clone();
        drop(store.register(approval).unwrap());

        assert!(store.resolve(&id, Choice::Approve).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear() {
        let store = CorrelationStore::new();
        let _r1 = store.register(pending(&SessionId::new())).unwrap();
        let _r2 = store.register(pending(&SessionId::new())).unwrap();
        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
    }
}
