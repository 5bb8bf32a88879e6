//! Agent session lifecycle status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an agent session.
///
/// ```text
/// running ⇄ awaiting_approval
///    │            │
///    ├────────────┴──→ cancelled | failed
///    └──→ completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The agent is working.
    #[default]
    Running,
    /// The agent is suspended at the permission gate.
    AwaitingApproval,
    /// The agent finished its task.
    Completed,
    /// The user cancelled the session.
    Cancelled,
    /// The backend failed unrecoverably.
    Failed,
}

impl SessionStatus {
    /// Returns true for completed, cancelled and failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Running, AwaitingApproval | Completed | Cancelled | Failed) => true,
            (AwaitingApproval, Running | Cancelled | Failed) => true,
            _ => false,
        }
    }

    /// Emoji used by chat front ends.
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Running => "⚙️",
            Self::AwaitingApproval => "⏸️",
            Self::Completed => "✅",
            Self::Cancelled => "🛑",
            Self::Failed => "❌",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
