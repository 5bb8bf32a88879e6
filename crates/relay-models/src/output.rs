//! Output flowing from an agent session to the chat transport.

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// One piece of agent output, numbered in production order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    /// Session that produced the chunk.
    pub session_id: SessionId,
    /// Position in the session's output stream, starting at 0.
    pub sequence: u64,
    /// Text payload.
    pub text: String,
    /// Marks the last chunk of the session.
    #[serde(default)]
    pub is_final: bool,
}

/// Consecutive chunks coalesced into a single update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBatch {
    pub session_id: SessionId,
    /// Sequence number of the first chunk in the batch.
    pub first_sequence: u64,
    /// Sequence number of the last chunk in the batch.
    pub last_sequence: u64,
    /// Concatenated text.
    pub text: String,
    /// True if the batch ends the stream.
    pub is_final: bool,
}

impl OutputBatch {
    /// Starts a batch from a single chunk.
    pub fn from_chunk(chunk: OutputChunk) -> Self {
        Self {
            session_id: chunk.session_id,
            first_sequence: chunk.sequence,
            last_sequence: chunk.sequence,
            text: chunk.text,
            is_final: chunk.is_final,
        }
    }

    /// Appends the next chunk.
    pub fn push(&mut self, chunk: OutputChunk) {
        self.last_sequence = chunk.sequence;
        self.text.push_str(&chunk.text);
        self.is_final |= chunk.is_final;
    }

    /// Number of chunks coalesced into this batch.
    pub fn chunk_count(&self) -> u64 {
        self.last_sequence - self.first_sequence + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64, text: &str, is_final: bool) -> OutputChunk {
        OutputChunk {
            session_id: SessionId::from_string("sess-test"),
            sequence: seq,
            text: text.to_string(),
            is_final,
        }
    }

    #[test]
    fn test_batch_accumulates() {
        let mut batch = OutputBatch::from_chunk(chunk(3, "hello ", false));
        batch.push(chunk(4, "world", false));

        assert_eq!(batch.text, "hello world");
        assert_eq!(batch.first_sequence, 3);
        assert_eq!(batch.last_sequence, 4);
        assert_eq!(batch.chunk_count(), 2);
        assert!(!batch.is_final);
    }

    #[test]
    fn test_batch_final_is_sticky() {
        let mut batch = OutputBatch::from_chunk(chunk(0, "a", false));
        batch.push(chunk(1, "", true));
        assert!(batch.is_final);
    }
}
