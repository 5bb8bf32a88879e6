//! Approval records, human choices and gate decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{ApprovalId, SessionId};

/// How dangerous a gated action looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only or otherwise harmless.
    #[default]
    Low,
    /// Modifies files or runs ordinary commands.
    Medium,
    /// Destructive or privileged commands.
    High,
}

impl RiskLevel {
    /// Emoji used by chat front ends.
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Low => "🟢",
            Self::Medium => "🟡",
            Self::High => "🔴",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
        }
    }
}

/// What kind of approval is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A side-effecting tool call.
    #[default]
    Tool,
    /// A plan the agent wants to start executing.
    Plan,
    /// A question the agent asks the human, answered by picking an option.
    Question,
}

/// A side-effecting action the agent wants to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Tool that would run (e.g. `Bash`, `Write`).
    pub tool_name: String,
    /// Human-readable description shown in the prompt.
    pub description: String,
    /// Risk classification.
    pub risk: RiskLevel,
    /// Tool call, plan or question.
    #[serde(default)]
    pub kind: ActionKind,
    /// Answers offered for a question.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl ActionRequest {
    /// Creates a tool action with low risk.
    pub fn new(tool_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            description: description.into(),
            risk: RiskLevel::Low,
            kind: ActionKind::Tool,
            options: Vec::new(),
        }
    }

    /// Creates a plan approval request.
    pub fn plan(description: impl Into<String>) -> Self {
        Self {
            tool_name: "ExitPlanMode".to_string(),
            description: description.into(),
            risk: RiskLevel::Medium,
            kind: ActionKind::Plan,
            options: Vec::new(),
        }
    }

    /// Creates a question with the answers the agent offered.
    pub fn question(question: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            tool_name: "AskUserQuestion".to_string(),
            description: question.into(),
            risk: RiskLevel::Low,
            kind: ActionKind::Question,
            options,
        }
    }

    /// Sets the risk level.
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    /// Returns true if this is a plan approval.
    pub fn is_plan(&self) -> bool {
        self.kind == ActionKind::Plan
    }

    /// Returns true if this asks the human a question.
    pub fn is_question(&self) -> bool {
        self.kind == ActionKind::Question
    }
}

/// Resolution state recorded on a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Unresolved,
    Approved,
    Denied,
    ApprovedAll,
}

/// A decision delivered by a human through the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Allow this one action.
    Approve,
    /// Refuse this action.
    Deny,
    /// Allow this action and every later one in the session.
    ApproveAll,
    /// Refuse this action and hand extra instructions back to the agent.
    Clarify(String),
    /// Answer a question.
    Answer(String),
}

impl Choice {
    /// Resolution recorded for this choice.
    pub fn resolution(&self) -> Resolution {
        match self {
            Self::Approve | Self::Answer(_) => Resolution::Approved,
            Self::ApproveAll => Resolution::ApprovedAll,
            Self::Deny | Self::Clarify(_) => Resolution::Denied,
        }
    }

    /// Converts the choice into the decision returned by the gate.
    pub fn into_decision(self) -> Decision {
        match self {
            Self::Approve | Self::ApproveAll => Decision::Approved { auto: false },
            Self::Deny => Decision::Denied(DenyReason::Rejected),
            Self::Clarify(text) => Decision::Denied(DenyReason::Clarified(text)),
            Self::Answer(text) => Decision::Answered(text),
        }
    }

    /// Short label shown after the decision is made.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Approve => "✅ Approved",
            Self::Deny => "❌ Rejected",
            Self::ApproveAll => "⚡ Approved all",
            Self::Clarify(_) => "💬 Clarified",
            Self::Answer(_) => "💬 Answered",
        }
    }
}

/// Why a gated action was not allowed to proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The human refused.
    Rejected,
    /// The human refused and supplied instructions.
    Clarified(String),
    /// Nobody answered before the deadline.
    Timeout,
    /// The session was cancelled; the agent should stop entirely.
    Cancelled,
    /// The prompt could not be delivered to the human.
    Unreachable,
    /// Refused by policy without asking.
    Policy(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => f.write_str("rejected by user"),
            Self::Clarified(_) => f.write_str("rejected with clarification"),
            Self::Timeout => f.write_str("timed out"),
            Self::Cancelled => f.write_str("session cancelled"),
            Self::Unreachable => f.write_str("approval prompt could not be delivered"),
            Self::Policy(msg) => write!(f, "denied by policy: {}", msg),
        }
    }
}

/// Outcome of a permission gate request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The action may proceed. `auto` is set when no human was asked.
    Approved { auto: bool },
    /// A question was answered; the tool proceeds with the answer.
    Answered(String),
    /// The action must not proceed.
    Denied(DenyReason),
}

impl Decision {
    /// Returns true if the action may proceed.
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. } | Self::Answered(_))
    }

    /// Returns true if the denial came from session cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Denied(DenyReason::Cancelled))
    }

    /// Returns the denial reason, if any.
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Denied(reason) => Some(reason),
            Self::Approved { .. } | Self::Answered(_) => None,
        }
    }

    /// Short label shown after the gate closes.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Approved { .. } => "✅ Approved",
            Self::Answered(_) => "💬 Answered",
            Self::Denied(DenyReason::Timeout) => "⌛ Timed out",
            Self::Denied(DenyReason::Cancelled) => "🛑 Cancelled",
            Self::Denied(DenyReason::Clarified(_)) => "💬 Clarified",
            Self::Denied(_) => "❌ Rejected",
        }
    }
}

/// An approval waiting for a human decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    /// Unique, never reused identifier.
    pub approval_id: ApprovalId,
    /// Session that is suspended on this approval.
    pub session_id: SessionId,
    /// The action being gated.
    pub action: ActionRequest,
    /// When the request was registered.
    pub created_at: DateTime<Utc>,
    /// Resolution state.
    #[serde(default)]
    pub resolution: Resolution,
}

impl PendingApproval {
    /// Creates an unresolved approval with a fresh id.
    pub fn new(session_id: SessionId, action: ActionRequest) -> Self {
        Self {
            approval_id: ApprovalId::new(),
            session_id,
            action,
            created_at: Utc::now(),
            resolution: Resolution::Unresolved,
        }
    }

    /// Returns true while no decision has been recorded.
    pub fn is_unresolved(&self) -> bool {
        self.resolution == Resolution::Unresolved
    }
}
