//! Cooperative cancellation flag.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable, one-way cancellation flag backed by a watch channel.
///
/// Every clone observes the same flag. [`cancelled`](Self::cancelled) wakes
/// as soon as [`cancel`](Self::cancel) is called, without polling.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Sets the flag. Returns true if this call set it.
    pub fn cancel(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Returns true once the flag is set.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes when the flag is set.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}
