//! Tool policy: which tool calls run freely, which are refused outright,
//! and which must go through the permission gate.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use relay_core::settings::expand_path;
use relay_core::{truncate_chars, PermissionMode};
use relay_models::{ActionRequest, RiskLevel};
use serde_json::Value;

use crate::describe::{describe_action, path_argument};

/// Tools that never modify anything.
pub const SAFE_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "LS",
    "WebFetch",
    "WebSearch",
    "TodoWrite",
    "Task",
];

/// Tools whose path argument must stay inside the working directory.
pub const PATH_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "MultiEdit",
    "NotebookEdit",
    "Glob",
    "Grep",
    "LS",
];

/// Tools that edit files.
pub const EDIT_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

/// Tool the agent calls to leave plan mode.
pub const PLAN_TOOL: &str = "ExitPlanMode";

/// Tool the agent calls to ask the human a multiple-choice question.
pub const QUESTION_TOOL: &str = "AskUserQuestion";

/// Writes below this directory are plans, whichever tool makes them.
const PLANS_DIR: &str = ".claude/plans/";

const MAX_PLAN_EDIT_CHARS: usize = 500;

/// What to do with a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolVerdict {
    /// Run without asking.
    Allow,
    /// Refuse without asking.
    Deny(String),
    /// Ask a human through the gate.
    Ask(ActionRequest),
}

/// Per-session tool policy.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    working_dir: PathBuf,
    mode: PermissionMode,
}

impl ToolPolicy {
    pub fn new(working_dir: impl Into<PathBuf>, mode: PermissionMode) -> Self {
        Self {
            working_dir: normalize(&working_dir.into()),
            mode,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Classify a `can_use_tool` request.
    pub fn evaluate(&self, tool_name: &str, input: &Value) -> ToolVerdict {
        if tool_name == QUESTION_TOOL {
            if let Some(question) = question_request(input) {
                return ToolVerdict::Ask(question);
            }
        }

        if PATH_TOOLS.contains(&tool_name) {
            if let Some(path) = path_argument(input) {
                if !self.is_inside(path) {
                    return ToolVerdict::Deny(format!(
                        "Access denied: Path '{}' is outside the current project. Working directory: {}",
                        path,
                        self.working_dir.display()
                    ));
                }
            }
        }

        if let Some(plan) = plan_file_write(tool_name, input) {
            return ToolVerdict::Ask(ActionRequest {
                tool_name: tool_name.to_string(),
                ..ActionRequest::plan(plan)
            });
        }

        if tool_name == PLAN_TOOL {
            return ToolVerdict::Ask(ActionRequest::plan(describe_action(tool_name, input)));
        }

        if SAFE_TOOLS.contains(&tool_name) {
            return ToolVerdict::Allow;
        }

        if self.mode == PermissionMode::AcceptEdits && EDIT_TOOLS.contains(&tool_name) {
            return ToolVerdict::Allow;
        }

        ToolVerdict::Ask(
            ActionRequest::new(tool_name, describe_action(tool_name, input))
                .with_risk(assess_risk(tool_name, input)),
        )
    }

    /// Returns true if `path` resolves inside the working directory.
    pub fn is_inside(&self, path: &str) -> bool {
        let path = expand_path(path);
        let joined = if path.is_absolute() {
            path
        } else {
            self.working_dir.join(path)
        };
        normalize(&joined).starts_with(&self.working_dir)
    }
}

/// The first question of an `AskUserQuestion` call with its option labels.
fn question_request(input: &Value) -> Option<ActionRequest> {
    let first = input.get("questions")?.as_array()?.first()?;
    let question = first.get("question").and_then(Value::as_str)?;
    let options = first
        .get("options")
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .filter_map(|o| o.get("label").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(ActionRequest::question(question, options))
}

/// Plan text for a `Write` or `Edit` into the plans directory.
fn plan_file_write(tool_name: &str, input: &Value) -> Option<String> {
    let path = path_argument(input).filter(|p| p.contains(PLANS_DIR))?;
    let field = |key: &str| input.get(key).and_then(Value::as_str).unwrap_or("");
    match tool_name {
        "Write" => Some(field("content").to_string()),
        "Edit" => Some(format!(
            "Editing plan {}\n\nWas:\n{}\n\nNow:\n{}",
            path,
            truncate_chars(field("old_string"), MAX_PLAN_EDIT_CHARS),
            truncate_chars(field("new_string"), MAX_PLAN_EDIT_CHARS)
        )),
        _ => None,
    }
}

/// Resolve `.` and `..` lexically, then symlinks on the deepest ancestor
/// that exists. The target itself may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut lexical = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                lexical.pop();
            }
            Component::CurDir => {}
            other => lexical.push(other.as_os_str()),
        }
    }

    let mut existing = lexical.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(real) = existing.canonicalize() {
            return missing.iter().rev().fold(real, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

fn destructive_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\brm\s+(-[a-zA-Z]*[rR][a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*[rR])\b",
            r"\brm\s+-[a-zA-Z]*[rR]\b.*\s-f\b",
            r"(^|[;&|]\s*)sudo\b",
            r"\bgit\s+push\b.*(--force\b|\s-f\b)",
            r"\bmkfs(\.\w+)?\b",
            r"\bdd\s+if=",
            r"\b(curl|wget)\b[^|]*\|\s*(ba|z)?sh\b",
            r"\bchmod\s+(-R\s+)?777\b",
            r">\s*/etc/",
            r"\btee\s+(-a\s+)?/etc/",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Risk of a gated tool call.
pub fn assess_risk(tool_name: &str, input: &Value) -> RiskLevel {
    match tool_name {
        "Bash" => {
            let command = input.get("command").and_then(Value::as_str).unwrap_or("");
            if destructive_patterns().iter().any(|p| p.is_match(command)) {
                RiskLevel::High
            } else {
                RiskLevel::Medium
            }
        }
        t if EDIT_TOOLS.contains(&t) => {
            let writes_etc = path_argument(input)
                .map(|p| p.starts_with("/etc/"))
                .unwrap_or(false);
            if writes_etc {
                RiskLevel::High
            } else {
                RiskLevel::Medium
            }
        }
        _ => RiskLevel::Low,
    }
}
