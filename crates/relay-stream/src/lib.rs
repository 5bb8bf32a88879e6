//! Output streaming for Claude Relay.
//!
//! An agent session writes text into an [`OutputSink`]; a [`StreamRelay`]
//! drains the matching [`OutputStream`], restores sequence order, coalesces
//! bursts into batches and hands them to an [`OutputPresenter`] at a rate
//! the chat transport can sustain.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_models::{OutputBatch, SessionId};
//! use relay_stream::{output_channel, OutputPresenter, StreamConfig, StreamRelay};
//!
//! struct Stdout;
//!
//! #[async_trait::async_trait]
//! impl OutputPresenter for Stdout {
//!     async fn present(&self, batch: OutputBatch) -> relay_stream::Result<()> {
//!         print!("{}", batch.text);
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() {
//! let (sink, stream) = output_channel(SessionId::new());
//! let relay = StreamRelay::new(StreamConfig::default(), Arc::new(Stdout));
//! let handle = tokio::spawn(async move { relay.run(stream).await });
//!
//! sink.emit("working...\n");
//! sink.finish("done\n");
//! let _stats = handle.await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod presenter;
pub mod relay;
pub mod sink;

pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use presenter::OutputPresenter;
pub use relay::{RelayStats, StreamRelay};
pub use sink::{output_channel, OutputSink, OutputStream};
