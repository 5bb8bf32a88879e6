//! Producer side of a session's output stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use relay_models::{OutputChunk, SessionId};
use tokio::sync::mpsc;
use tracing::trace;

/// Creates a connected sink/stream pair for one session.
pub fn output_channel(session_id: SessionId) -> (OutputSink, OutputStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = OutputSink {
        session_id,
        tx,
        next_sequence: Arc::new(AtomicU64::new(0)),
        finished: Arc::new(AtomicBool::new(false)),
    };
    (sink, OutputStream { rx })
}

/// Numbers agent output and hands it to the relay.
///
/// Cloning is cheap; clones share the sequence counter, so chunks from
/// several producers still get distinct, increasing sequence numbers.
#[derive(Debug, Clone)]
pub struct OutputSink {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<OutputChunk>,
    next_sequence: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
}

impl OutputSink {
    /// Session this sink belongs to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Emit a non-final chunk. Returns false once the stream is finished or
    /// the relay has gone away.
    pub fn emit(&self, text: impl Into<String>) -> bool {
        if self.is_finished() {
            return false;
        }
        let text = text.into();
        if text.is_empty() {
            return true;
        }
        self.push(text, false)
    }

    /// Emit the final chunk. Only the first call has any effect.
    pub fn finish(&self, text: impl Into<String>) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.push(text.into(), true)
    }

    /// Returns true after [`finish`](Self::finish) was called.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Number of chunks handed out so far.
    pub fn emitted(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    fn push(&self, text: String, is_final: bool) -> bool {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        trace!(session_id = %self.session_id, sequence, is_final, "output chunk");
        self.tx
            .send(OutputChunk {
                session_id: self.session_id.clone(),
                sequence,
                text,
                is_final,
            })
            .is_ok()
    }
}

/// Consumer side of a session's output stream.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<OutputChunk>,
}

impl OutputStream {
    /// Wraps a raw receiver for producers that number chunks themselves.
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<OutputChunk>) -> Self {
        Self { rx }
    }

    /// Receive the next chunk in arrival order; `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }
}
