//! Runtime settings loaded from environment variables.
//!
//! # Environment Variables
//!
//! Required:
//! - `TELEGRAM_BOT_TOKEN` (or `TELEGRAM_TOKEN`): Bot token from @BotFather
//!
//! Optional:
//! - `ALLOWED_USER_IDS` (or `ALLOWED_USER_ID`): Comma separated Telegram user ids
//! - `CLAUDE_PATH`: Claude Code executable (default: `claude` on PATH)
//! - `CLAUDE_WORKING_DIR`: Default working directory (default: current directory)
//! - `CLAUDE_MODEL`: Model passed to `--model`
//! - `CLAUDE_MAX_TURNS`: Turn limit (default: 50)
//! - `CLAUDE_PERMISSION_MODE`: `default`, `acceptEdits` or `bypassPermissions`
//! - `APPROVAL_TIMEOUT_SECS`: Tool approval deadline (default: 300)
//! - `PLAN_TIMEOUT_SECS`: Plan approval deadline (default: 600)
//! - `YOLO_SCOPE`: `session` or `chat` (default: session)
//! - `YOLO_EXEMPT_PLANS`: Keep prompting for plans under approve-all (default: true)
//! - `STREAM_WINDOW_MS`: Output coalescing window (default: 1000)
//! - `STREAM_MAX_BATCH_BYTES`: Flush threshold (default: 3000)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{ConfigError, Result};

/// Default turn limit for a single task.
pub const DEFAULT_MAX_TURNS: u32 = 50;

/// Default tool approval deadline.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Default plan approval deadline.
pub const DEFAULT_PLAN_TIMEOUT: Duration = Duration::from_secs(600);

/// How tool calls are gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    /// Ask for every side-effecting tool.
    #[default]
    Default,
    /// File edits inside the working directory are allowed without asking.
    AcceptEdits,
    /// Sessions start with approve-all enabled.
    BypassPermissions,
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "default" => Ok(Self::Default),
            "acceptEdits" | "accept_edits" => Ok(Self::AcceptEdits),
            "bypassPermissions" | "bypass_permissions" | "yolo" => Ok(Self::BypassPermissions),
            other => Err(format!("unknown permission mode '{}'", other)),
        }
    }
}

/// How long an approve-all grant lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YoloScope {
    /// Until the session ends.
    #[default]
    Session,
    /// Carried to later sessions of the same chat until revoked or restart.
    Chat,
}

impl FromStr for YoloScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown yolo scope '{}'", other)),
        }
    }
}

/// Settings for the relay process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub telegram_token: String,
    /// Empty means anyone may use the bot.
    pub allowed_user_ids: Vec<u64>,
    pub claude_path: PathBuf,
    pub working_dir: PathBuf,
    pub model: Option<String>,
    pub max_turns: u32,
    pub permission_mode: PermissionMode,
    pub approval_timeout: Duration,
    pub plan_timeout: Duration,
    pub yolo_scope: YoloScope,
    pub yolo_exempt_plans: bool,
    pub stream_window: Duration,
    pub stream_max_batch_bytes: usize,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let telegram_token = get("TELEGRAM_BOT_TOKEN")
            .or_else(|| get("TELEGRAM_TOKEN"))
            .ok_or(ConfigError::MissingVar("TELEGRAM_BOT_TOKEN"))?;

        let allowed_user_ids = match get("ALLOWED_USER_IDS").or_else(|| get("ALLOWED_USER_ID")) {
            Some(raw) => parse_user_ids(&raw)?,
            None => Vec::new(),
        };
        if allowed_user_ids.is_empty() {
            warn!("ALLOWED_USER_IDS is empty; the bot will answer every Telegram user");
        }

        let claude_path = get("CLAUDE_PATH")
            .map(|p| expand_path(&p))
            .unwrap_or_else(|| which::which("claude").unwrap_or_else(|_| PathBuf::from("claude")));

        let working_dir = get("CLAUDE_WORKING_DIR")
            .map(|p| expand_path(&p))
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        Ok(Self {
            telegram_token,
            allowed_user_ids,
            claude_path,
            working_dir,
            model: get("CLAUDE_MODEL"),
            max_turns: parse_or("CLAUDE_MAX_TURNS", get("CLAUDE_MAX_TURNS"), DEFAULT_MAX_TURNS)?,
            permission_mode: parse_or(
                "CLAUDE_PERMISSION_MODE",
                get("CLAUDE_PERMISSION_MODE"),
                PermissionMode::Default,
            )?,
            approval_timeout: Duration::from_secs(parse_or(
                "APPROVAL_TIMEOUT_SECS",
                get("APPROVAL_TIMEOUT_SECS"),
                DEFAULT_APPROVAL_TIMEOUT.as_secs(),
            )?),
            plan_timeout: Duration::from_secs(parse_or(
                "PLAN_TIMEOUT_SECS",
                get("PLAN_TIMEOUT_SECS"),
                DEFAULT_PLAN_TIMEOUT.as_secs(),
            )?),
            yolo_scope: parse_or("YOLO_SCOPE", get("YOLO_SCOPE"), YoloScope::Session)?,
            yolo_exempt_plans: parse_or("YOLO_EXEMPT_PLANS", get("YOLO_EXEMPT_PLANS"), true)?,
            stream_window: Duration::from_millis(parse_or(
                "STREAM_WINDOW_MS",
                get("STREAM_WINDOW_MS"),
                1000u64,
            )?),
            stream_max_batch_bytes: parse_or(
                "STREAM_MAX_BATCH_BYTES",
                get("STREAM_MAX_BATCH_BYTES"),
                3000usize,
            )?,
        })
    }

    /// Returns true if `user_id` may talk to the bot.
    pub fn is_user_allowed(&self, user_id: u64) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.contains(&user_id)
    }
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw.trim()) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw.trim()).as_ref()),
    }
}

fn parse_user_ids(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                var: "ALLOWED_USER_IDS",
                value: s.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
