//! Agent runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use relay_core::settings::DEFAULT_MAX_TURNS;
use relay_core::{PermissionMode, Settings};

use crate::runtime::AgentTask;

/// Configuration for launching the Claude Code CLI.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Executable to run.
    pub claude_path: PathBuf,
    /// Model override passed as `--model`.
    pub model: Option<String>,
    /// Turn limit passed as `--max-turns`.
    pub max_turns: u32,
    /// How tool calls are gated.
    pub permission_mode: PermissionMode,
    /// How long to wait after an interrupt before killing the process.
    pub interrupt_grace: Duration,
    /// Extra arguments appended to the command line.
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            claude_path: PathBuf::from("claude"),
            model: None,
            max_turns: DEFAULT_MAX_TURNS,
            permission_mode: PermissionMode::Default,
            interrupt_grace: Duration::from_secs(5),
            extra_args: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the agent configuration from loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            claude_path: settings.claude_path.clone(),
            model: settings.model.clone(),
            max_turns: settings.max_turns,
            permission_mode: settings.permission_mode,
            ..Self::default()
        }
    }

    /// Sets the executable path.
    pub fn with_claude_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.claude_path = path.into();
        self
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the turn limit.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Sets the permission mode.
    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    /// Sets the interrupt grace period.
    pub fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }

    /// Command-line arguments for running `task`.
    ///
    /// The prompt itself is sent over stdin, not on the command line.
    pub fn launch_args(&self, task: &AgentTask) -> Vec<String> {
        let mut args: Vec<String> = [
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--verbose",
            "--permission-prompt-tool",
            "stdio",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("--max-turns".to_string());
        args.push(self.max_turns.to_string());

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(conversation) = &task.resume {
            args.push("--resume".to_string());
            args.push(conversation.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}
