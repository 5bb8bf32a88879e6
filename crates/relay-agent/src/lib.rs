//! Agent runtime for Claude Relay.
//!
//! [`TaskExecutor`] starts a session for each task, runs it through an
//! [`AgentRuntime`] and streams its output to the chat. [`ClaudeCli`] drives
//! the Claude Code CLI over its stream-json protocol, routing tool
//! permission checks through a [`ToolPolicy`] and the permission gate.

pub mod claude;
pub mod config;
pub mod describe;
pub mod error;
pub mod executor;
pub mod policy;
pub mod protocol;
pub mod runtime;

pub use claude::{drive, ClaudeCli};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use executor::{SessionReport, TaskExecutor};
pub use policy::{assess_risk, ToolPolicy, ToolVerdict};
pub use protocol::PermissionResponse;
pub use runtime::{AgentRuntime, AgentTask, RunSummary};
