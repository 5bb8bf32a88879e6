//! Human-in-the-loop permission coordination for Claude Relay.
//!
//! An agent task calls [`PermissionGate::request`] before every
//! side-effecting action. The gate records a [`PendingApproval`] in the
//! [`CorrelationStore`], tells the chat layer through an
//! [`ApprovalNotifier`], and suspends until one of:
//!
//! - a human decision arrives through [`DecisionChannel::resolve`]
//! - the request's deadline passes (`Denied(Timeout)`)
//! - the session is cancelled (`Denied(Cancelled)`)
//!
//! Approve-all grants are recorded on the [`AgentSession`] and let later
//! requests through without suspending, subject to [`YoloPolicy`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_gate::{ChannelNotifier, Coordinator, GateConfig, GateEvent};
//! use relay_models::{ActionRequest, Choice};
//!
//! # async fn demo() {
//! let (notifier, mut events) = ChannelNotifier::new();
//! let coordinator = Arc::new(Coordinator::new(GateConfig::default(), Arc::new(notifier)));
//! let (session, _output) = coordinator.start_session("/tmp/project").await;
//!
//! let c = Arc::clone(&coordinator);
//! tokio::spawn(async move {
//!     if let Some(GateEvent::ApprovalRequested(pending)) = events.recv().await {
//!         c.decisions().resolve(&pending.approval_id, Choice::Approve);
//!     }
//! });
//!
//! let decision = coordinator
//!     .gate()
//!     .request(&session, ActionRequest::new("Write", "write file X"))
//!     .await;
//! assert!(decision.is_approved());
//! # }
//! ```
//!
//! [`PendingApproval`]: relay_models::PendingApproval

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod decision;
pub mod error;
pub mod gate;
pub mod notify;
pub mod session;
pub mod store;

pub use cancel::CancelFlag;
pub use config::{GateConfig, YoloPolicy};
pub use coordinator::Coordinator;
pub use decision::DecisionChannel;
pub use error::{GateError, Result};
pub use gate::PermissionGate;
pub use notify::{ApprovalNotifier, ChannelNotifier, GateEvent};
pub use session::AgentSession;
pub use store::CorrelationStore;
