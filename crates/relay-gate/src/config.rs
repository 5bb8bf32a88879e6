//! Gate configuration.

use std::time::Duration;

use relay_core::{Settings, YoloScope};
use relay_models::ActionRequest;

/// Approve-all (YOLO) policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YoloPolicy {
    /// How long a grant lives.
    pub scope: YoloScope,
    /// Plan approvals keep prompting while approve-all is on.
    pub exempt_plans: bool,
}

impl Default for YoloPolicy {
    fn default() -> Self {
        Self {
            scope: YoloScope::Session,
            exempt_plans: true,
        }
    }
}

impl YoloPolicy {
    /// Returns true if approve-all may skip the prompt for `action`.
    /// Questions always reach the human.
    pub fn covers(&self, action: &ActionRequest) -> bool {
        !action.is_question() && !(action.is_plan() && self.exempt_plans)
    }
}

/// Configuration for the permission gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Deadline for tool approvals.
    pub approval_timeout: Duration,
    /// Deadline for plan approvals.
    pub plan_timeout: Duration,
    /// Approve-all policy.
    pub yolo: YoloPolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            approval_timeout: Duration::from_secs(300),
            plan_timeout: Duration::from_secs(600),
            yolo: YoloPolicy::default(),
        }
    }
}

impl GateConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the gate configuration from loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            approval_timeout: settings.approval_timeout,
            plan_timeout: settings.plan_timeout,
            yolo: YoloPolicy {
                scope: settings.yolo_scope,
                exempt_plans: settings.yolo_exempt_plans,
            },
        }
    }

    /// Sets the tool approval deadline.
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Sets the plan approval deadline.
    pub fn with_plan_timeout(mut self, timeout: Duration) -> Self {
        self.plan_timeout = timeout;
        self
    }

    /// Sets the approve-all policy.
    pub fn with_yolo(mut self, yolo: YoloPolicy) -> Self {
        self.yolo = yolo;
        self
    }

    /// Deadline that applies to `action`.
    pub fn timeout_for(&self, action: &ActionRequest) -> Duration {
        if action.is_plan() {
            self.plan_timeout
        } else {
            self.approval_timeout
        }
    }
}
