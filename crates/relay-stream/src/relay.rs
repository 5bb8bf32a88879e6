//! Coalescing relay from an output stream to a presenter.

use std::collections::BTreeMap;
use std::sync::Arc;

use relay_models::{OutputBatch, OutputChunk};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::presenter::OutputPresenter;
use crate::sink::OutputStream;

/// Counters reported when a relay finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Chunks received from the stream.
    pub chunks_received: u64,
    /// Duplicate or stale chunks discarded.
    pub chunks_dropped: u64,
    /// Batches the presenter accepted.
    pub batches_sent: u64,
    /// Batches abandoned after presenter errors.
    pub batches_failed: u64,
}

/// Forwards one session's output to a presenter in sequence order,
/// merging bursts into bounded-rate updates.
pub struct StreamRelay {
    config: StreamConfig,
    presenter: Arc<dyn OutputPresenter>,
}

/// Chunks waiting for earlier sequence numbers.
struct Reorder {
    next: u64,
    held: BTreeMap<u64, OutputChunk>,
}

impl Reorder {
    fn new() -> Self {
        Self {
            next: 0,
            held: BTreeMap::new(),
        }
    }

    /// Returns false for chunks that were already delivered or are already held.
    fn insert(&mut self, chunk: OutputChunk) -> bool {
        if chunk.sequence < self.next || self.held.contains_key(&chunk.sequence) {
            return false;
        }
        self.held.insert(chunk.sequence, chunk);
        true
    }

    /// Pops the next in-order chunk, if it has arrived.
    fn pop_ready(&mut self) -> Option<OutputChunk> {
        let chunk = self.held.remove(&self.next)?;
        self.next = chunk.sequence + 1;
        Some(chunk)
    }

    /// Gives up on the current gap and resumes at the lowest held chunk.
    fn skip_gap(&mut self) -> Option<u64> {
        let lowest = *self.held.keys().next()?;
        let skipped = lowest - self.next;
        self.next = lowest;
        Some(skipped)
    }

    fn drain_all(&mut self) -> Vec<OutputChunk> {
        let chunks: Vec<OutputChunk> = std::mem::take(&mut self.held).into_values().collect();
        if let Some(last) = chunks.last() {
            self.next = last.sequence + 1;
        }
        chunks
    }
}

impl StreamRelay {
    /// Creates a relay delivering to `presenter`.
    pub fn new(config: StreamConfig, presenter: Arc<dyn OutputPresenter>) -> Self {
        Self { config, presenter }
    }

    /// Returns the relay configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Drain `stream` until the final chunk is delivered or every sink is dropped.
    pub async fn run(&self, mut stream: OutputStream) -> RelayStats {
        let mut stats = RelayStats::default();
        let mut reorder = Reorder::new();
        let mut batch: Option<OutputBatch> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                received = stream.recv() => {
                    let Some(chunk) = received else {
                        // Producers are gone; deliver whatever is held, gaps and all.
                        for chunk in reorder.drain_all() {
                            append(&mut batch, chunk);
                        }
                        self.flush(&mut batch, &mut stats).await;
                        break;
                    };

                    stats.chunks_received += 1;
                    if !reorder.insert(chunk) {
                        stats.chunks_dropped += 1;
                        trace!("dropping duplicate output chunk");
                        continue;
                    }
                    if reorder.held.len() > self.config.reorder_limit {
                        if let Some(skipped) = reorder.skip_gap() {
                            warn!(skipped, "output gap did not fill, skipping ahead");
                        }
                    }

                    let mut finished = false;
                    while let Some(chunk) = reorder.pop_ready() {
                        finished = chunk.is_final;
                        append(&mut batch, chunk);
                        if finished {
                            break;
                        }
                    }

                    if finished {
                        self.flush(&mut batch, &mut stats).await;
                        break;
                    }

                    let size = batch.as_ref().map(|b| b.text.len()).unwrap_or(0);
                    if size >= self.config.max_batch_bytes {
                        self.flush(&mut batch, &mut stats).await;
                        deadline = None;
                    } else if batch.is_some() && deadline.is_none() {
                        deadline = Some(Instant::now() + self.config.window);
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.flush(&mut batch, &mut stats).await;
                }
            }
        }

        debug!(
            chunks = stats.chunks_received,
            batches = stats.batches_sent,
            dropped = stats.chunks_dropped,
            "output relay finished"
        );
        stats
    }

    async fn flush(&self, batch: &mut Option<OutputBatch>, stats: &mut RelayStats) {
        let Some(batch) = batch.take() else {
            return;
        };
        if batch.text.is_empty() && !batch.is_final {
            return;
        }

        let mut attempt: u32 = 0;
        loop {
            match self.presenter.present(batch.clone()).await {
                Ok(()) => {
                    stats.batches_sent += 1;
                    return;
                }
                Err(StreamError::RateLimited(after)) if attempt < self.config.max_retries => {
                    let wait = after.mul_f64(self.config.backoff_multiplier.powi(attempt as i32));
                    warn!(
                        session_id = %batch.session_id,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        "presenter rate limited, retrying"
                    );
                    sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(session_id = %batch.session_id, error = %e, "dropping output batch");
                    stats.batches_failed += 1;
                    return;
                }
            }
        }
    }
}

fn append(batch: &mut Option<OutputBatch>, chunk: OutputChunk) {
    match batch {
        Some(b) => b.push(chunk),
        None => *batch = Some(OutputBatch::from_chunk(chunk)),
    }
}
