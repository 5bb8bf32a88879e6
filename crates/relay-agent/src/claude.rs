//! Claude Code CLI runtime.
//!
//! The CLI runs as a child process speaking stream-json. [`drive`] owns the
//! conversation: it sends the prompt, relays assistant output into the
//! session, answers `can_use_tool` requests through the [`ToolPolicy`] and
//! [`PermissionGate`], and returns when the CLI reports a result.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use relay_gate::{AgentSession, PermissionGate};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::AgentConfig;
use crate::describe::{format_tool_error, format_tool_use};
use crate::error::{AgentError, Result};
use crate::policy::{ToolPolicy, ToolVerdict};
use crate::protocol::{
    encode, error_response, initialize_request, interrupt_request, parse_line, user_message,
    ContentBlock, ControlRequest, Inbound, PermissionResponse, ResultMessage,
};
use crate::runtime::{AgentRuntime, AgentTask, RunSummary};

const STDERR_TAIL_LINES: usize = 20;

/// Runs tasks through the `claude` executable.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    config: AgentConfig,
}

impl ClaudeCli {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Process builder for `task` in `session`'s working directory.
    pub fn command(&self, task: &AgentTask, session: &AgentSession) -> Command {
        let mut cmd = Command::new(&self.config.claude_path);
        cmd.args(self.config.launch_args(task))
            .current_dir(session.working_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn stop(&self, child: &mut Child, session: &AgentSession) {
        match tokio::time::timeout(self.config.interrupt_grace, child.wait()).await {
            Ok(Ok(status)) => debug!(session_id = %session.id(), %status, "agent exited after interrupt"),
            _ => {
                warn!(session_id = %session.id(), "agent ignored interrupt, killing");
                if let Err(e) = child.kill().await {
                    warn!(session_id = %session.id(), error = %e, "failed to kill agent");
                }
            }
        }
    }
}

fn collect_stderr<R>(stderr: R) -> JoinHandle<Vec<String>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail = Vec::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "relay_agent::stderr", "{}", line);
            if tail.len() == STDERR_TAIL_LINES {
                tail.remove(0);
            }
            tail.push(line);
        }
        tail
    })
}

#[async_trait]
impl AgentRuntime for ClaudeCli {
    fn name(&self) -> &str {
        "claude-code"
    }

    async fn run(
        &self,
        task: AgentTask,
        session: Arc<AgentSession>,
        gate: Arc<PermissionGate>,
    ) -> Result<RunSummary> {
        let mut child = self.command(&task, &session).spawn().map_err(|e| {
            AgentError::Spawn(format!("{}: {}", self.config.claude_path.display(), e))
        })?;
        info!(
            session_id = %session.id(),
            pid = child.id().unwrap_or(0),
            resume = task.resume.as_deref().unwrap_or("-"),
            "agent process started"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Spawn("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("stdout not captured".to_string()))?;
        let stderr = child.stderr.take().map(collect_stderr);

        let policy = ToolPolicy::new(session.working_dir(), self.config.permission_mode);
        let outcome = drive(BufReader::new(stdout), stdin, &task, &session, &gate, &policy).await;

        match outcome {
            Err(AgentError::Cancelled) => {
                self.stop(&mut child, &session).await;
                Err(AgentError::Cancelled)
            }
            Ok(summary) => {
                // stdin is closed; the CLI exits on its own.
                if let Ok(Ok(status)) =
                    tokio::time::timeout(self.config.interrupt_grace, child.wait()).await
                {
                    debug!(session_id = %session.id(), %status, "agent process exited");
                } else {
                    let _ = child.kill().await;
                }
                Ok(summary)
            }
            Err(AgentError::ExitedEarly(reason)) => {
                let grace = self.config.interrupt_grace;
                let status = match tokio::time::timeout(grace, child.wait()).await {
                    Ok(status) => status?.to_string(),
                    Err(_) => {
                        warn!(
                            session_id = %session.id(),
                            "agent closed its output but kept running, killing"
                        );
                        if let Err(e) = child.kill().await {
                            warn!(session_id = %session.id(), error = %e, "failed to kill agent");
                        }
                        "killed".to_string()
                    }
                };
                let tail = match stderr {
                    Some(handle) => tokio::time::timeout(grace, handle)
                        .await
                        .ok()
                        .and_then(|joined| joined.ok())
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                let detail = tail.last().cloned().unwrap_or(reason);
                Err(AgentError::ExitedEarly(format!("{} ({})", detail, status)))
            }
            Err(e) => {
                let _ = child.kill().await;
                Err(e)
            }
        }
    }
}

async fn send<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode(message)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn summarize(result: ResultMessage, conversation_id: Option<String>) -> Result<RunSummary> {
    if result.is_error {
        let message = result
            .result
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| result.subtype.clone());
        return Err(AgentError::Backend(message));
    }
    Ok(RunSummary {
        conversation_id: result.session_id.or(conversation_id),
        result: result.result,
        cost_usd: result.total_cost_usd,
        num_turns: result.num_turns,
        duration_ms: result.duration_ms,
    })
}

/// Run one conversation over an already connected CLI.
///
/// `reader` is the CLI's stdout and `writer` its stdin. Returns when the
/// CLI sends a `result`, when the session is cancelled (after sending an
/// interrupt) or when the output closes.
pub async fn drive<R, W>(
    reader: R,
    mut writer: W,
    task: &AgentTask,
    session: &AgentSession,
    gate: &PermissionGate,
    policy: &ToolPolicy,
) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut conversation_id = task.resume.clone();
    let mut next_request = 0u64;
    let mut request_id = |kind: &str| {
        next_request += 1;
        format!("relay_{}_{}", kind, next_request)
    };

    send(&mut writer, &initialize_request(&request_id("init"))).await?;
    send(&mut writer, &user_message(&task.prompt)).await?;

    loop {
        let line = tokio::select! {
            biased;
            _ = session.cancelled() => {
                if let Err(e) = send(&mut writer, &interrupt_request(&request_id("interrupt"))).await {
                    debug!(session_id = %session.id(), error = %e, "interrupt not delivered");
                }
                return Err(AgentError::Cancelled);
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            if session.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            return Err(AgentError::ExitedEarly(
                "output closed without a result".to_string(),
            ));
        };

        let message = match parse_line(&line) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(e) => {
                warn!(session_id = %session.id(), error = %e, "unreadable agent output");
                return Err(match e {
                    AgentError::Json(e) => AgentError::Protocol(format!("malformed message: {}", e)),
                    other => other,
                });
            }
        };

        match message {
            Inbound::System {
                subtype,
                session_id,
                model,
            } => {
                if subtype.as_deref() == Some("init") {
                    debug!(
                        session_id = %session.id(),
                        conversation = session_id.as_deref().unwrap_or("-"),
                        model = model.as_deref().unwrap_or("-"),
                        "agent initialized"
                    );
                    if session_id.is_some() {
                        conversation_id = session_id;
                    }
                }
            }
            Inbound::Assistant { message } => {
                for block in message.content.into_blocks() {
                    match block {
                        ContentBlock::Text { text } => {
                            let text = text.trim_end();
                            if !text.is_empty() {
                                session.emit(format!("{}\n", text));
                            }
                        }
                        ContentBlock::ToolUse { name, input, .. } => {
                            session.emit(format_tool_use(&name, &input));
                        }
                        ContentBlock::Thinking { .. } => trace!("thinking block"),
                        _ => {}
                    }
                }
            }
            Inbound::User { message } => {
                for block in message.content.into_blocks() {
                    if let ContentBlock::ToolResult {
                        content,
                        is_error: true,
                        ..
                    } = block
                    {
                        session.emit(format_tool_error(&content));
                    }
                }
            }
            Inbound::Outcome(result) => {
                info!(
                    session_id = %session.id(),
                    subtype = %result.subtype,
                    is_error = result.is_error,
                    turns = result.num_turns.unwrap_or(0),
                    "agent finished"
                );
                return summarize(result, conversation_id);
            }
            Inbound::ControlRequest {
                request_id: id,
                request,
            } => {
                let reply = match request {
                    ControlRequest::CanUseTool { tool_name, input } => {
                        let response = permission(&tool_name, input, session, gate, policy).await;
                        response.to_message(&id)
                    }
                    ControlRequest::Other => {
                        debug!(session_id = %session.id(), request_id = %id, "unsupported control request");
                        error_response(&id, "unsupported control request")
                    }
                };
                send(&mut writer, &reply).await?;
            }
            Inbound::ControlResponse { response } => {
                trace!(?response, "control response");
            }
            Inbound::Unknown => {}
        }
    }
}

async fn permission(
    tool_name: &str,
    input: Value,
    session: &AgentSession,
    gate: &PermissionGate,
    policy: &ToolPolicy,
) -> PermissionResponse {
    match policy.evaluate(tool_name, &input) {
        ToolVerdict::Allow => {
            trace!(tool = tool_name, "tool allowed by policy");
            PermissionResponse::Allow {
                updated_input: input,
            }
        }
        ToolVerdict::Deny(message) => {
            info!(session_id = %session.id(), tool = tool_name, "tool denied by policy");
            session.emit(format!("🚫 {}\n", message));
            PermissionResponse::deny(message)
        }
        ToolVerdict::Ask(action) => {
            let decision = gate.request(session, action).await;
            PermissionResponse::from_decision(&decision, input)
        }
    }
}
