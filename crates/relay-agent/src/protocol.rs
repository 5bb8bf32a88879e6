//! Claude Code stream-json protocol.
//!
//! The CLI is started with `--input-format stream-json --output-format
//! stream-json` and talks newline-delimited JSON on stdin/stdout. Permission
//! checks arrive as `control_request` messages with subtype `can_use_tool`
//! and must be answered with a matching `control_response`.

use relay_models::{Decision, DenyReason};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};

/// Maximum accepted size of one NDJSON line (10 MiB).
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

pub const REJECTED_MESSAGE: &str = "User rejected the operation";
pub const TIMEOUT_MESSAGE: &str = "Permission request timed out";
pub const CANCELLED_MESSAGE: &str = "Task cancelled by user";
pub const UNREACHABLE_MESSAGE: &str = "Approval could not be requested";
pub const CLARIFY_PREFIX: &str = "User provided additional context: ";

/// One message read from the CLI's stdout.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Assistant {
        message: Message,
    },
    User {
        message: Message,
    },
    #[serde(rename = "result")]
    Outcome(ResultMessage),
    ControlRequest {
        request_id: String,
        request: ControlRequest,
    },
    ControlResponse {
        #[serde(default)]
        response: Value,
    },
    #[serde(other)]
    Unknown,
}

/// Assistant or user message body.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Content,
}

/// Message content: plain text or a list of blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for Content {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

impl Content {
    /// Content as blocks; plain text becomes a single text block.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text { text }],
            Self::Blocks(blocks) => blocks,
        }
    }
}

/// A content block inside a message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Final message of a run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Body of a control request sent by the CLI.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequest {
    CanUseTool {
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Parse one stdout line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Inbound>> {
    if line.len() > MAX_LINE_BYTES {
        return Err(AgentError::Protocol(format!(
            "line of {} bytes exceeds {} byte limit",
            line.len(),
            MAX_LINE_BYTES
        )));
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(trimmed)?))
}

/// `input` of an `AskUserQuestion` call with the human's answer attached.
fn with_answer(mut input: Value, answer: &str) -> Value {
    let question = input
        .pointer("/questions/0/question")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if let Value::Object(map) = &mut input {
        let mut answers = serde_json::Map::new();
        answers.insert(question, Value::String(answer.to_string()));
        map.insert("answers".to_string(), Value::Object(answers));
    }
    input
}

/// Answer to a `can_use_tool` request.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionResponse {
    Allow { updated_input: Value },
    Deny { message: String, interrupt: bool },
}

impl PermissionResponse {
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: false,
        }
    }

    /// Map a gate decision onto the CLI answer. Approved actions keep
    /// their original input; answered questions get an `answers` map keyed
    /// by question text.
    pub fn from_decision(decision: &Decision, input: Value) -> Self {
        match decision {
            Decision::Approved { .. } => Self::Allow {
                updated_input: input,
            },
            Decision::Answered(answer) => Self::Allow {
                updated_input: with_answer(input, answer),
            },
            Decision::Denied(reason) => match reason {
                DenyReason::Rejected => Self::deny(REJECTED_MESSAGE),
                DenyReason::Clarified(text) => Self::deny(format!("{}{}", CLARIFY_PREFIX, text)),
                DenyReason::Timeout => Self::deny(TIMEOUT_MESSAGE),
                DenyReason::Cancelled => Self::Deny {
                    message: CANCELLED_MESSAGE.to_string(),
                    interrupt: true,
                },
                DenyReason::Unreachable => Self::deny(UNREACHABLE_MESSAGE),
                DenyReason::Policy(msg) => Self::deny(msg.clone()),
            },
        }
    }

    /// The `control_response` envelope for `request_id`.
    pub fn to_message(&self, request_id: &str) -> Value {
        let body = match self {
            Self::Allow { updated_input } => json!({
                "behavior": "allow",
                "updatedInput": updated_input,
            }),
            Self::Deny { message, interrupt } => json!({
                "behavior": "deny",
                "message": message,
                "interrupt": interrupt,
            }),
        };
        json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": body,
            }
        })
    }
}

/// A user turn.
pub fn user_message(text: &str) -> Value {
    json!({
        "type": "user",
        "message": { "role": "user", "content": text },
    })
}

/// Handshake sent before the first user turn.
pub fn initialize_request(request_id: &str) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": { "subtype": "initialize", "hooks": null },
    })
}

/// Asks the CLI to stop the current turn.
pub fn interrupt_request(request_id: &str) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": { "subtype": "interrupt" },
    })
}

/// Error answer to a control request the relay does not handle.
pub fn error_response(request_id: &str, error: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": error,
        }
    })
}

/// Serialize a message as one NDJSON line.
pub fn encode(message: &Value) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
