//! Error types for output streaming.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by an output presenter.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The transport asked us to slow down.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    /// The transport rejected the update.
    #[error("presenter error: {0}")]
    Presenter(String),
}

/// Result type for streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;
