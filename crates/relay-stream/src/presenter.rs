//! Presentation boundary for coalesced output.

use async_trait::async_trait;
use relay_models::OutputBatch;

use crate::error::Result;

/// Receives coalesced output batches for one session, in sequence order.
#[async_trait]
pub trait OutputPresenter: Send + Sync {
    /// Render a batch. Return [`StreamError::RateLimited`](crate::StreamError::RateLimited)
    /// to have the relay retry after the given delay.
    async fn present(&self, batch: OutputBatch) -> Result<()>;
}
