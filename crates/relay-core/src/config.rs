//! State directory layout for Claude Relay.
//!
//! All application data lives under `~/.claude-relay/`:
//!
//! ```text
//! ~/.claude-relay/
//! ├── config/       # .env with the bot token and allowlist
//! ├── logs/         # Application logs
//! └── state/        # Runtime state (chat preferences)
//! ```
//!
//! # Environment Variables
//!
//! - `RELAY_STATE_DIR`: Override the base state directory
//! - `RELAY_CONFIG_DIR`: Override the config directory

use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable for custom state directory.
pub const STATE_DIR_ENV: &str = "RELAY_STATE_DIR";

/// Environment variable for custom config directory.
pub const CONFIG_DIR_ENV: &str = "RELAY_CONFIG_DIR";

/// Default state directory name under home.
const DEFAULT_STATE_DIR: &str = ".claude-relay";

const CONFIG_SUBDIR: &str = "config";
const LOGS_SUBDIR: &str = "logs";
const STATE_SUBDIR: &str = "state";

static STATE_DIR_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Get the Claude Relay state directory.
///
/// Resolved once, from:
/// 1. `RELAY_STATE_DIR` environment variable if set
/// 2. `~/.claude-relay` if home directory is available
/// 3. `.claude-relay` in current directory as fallback
pub fn state_dir() -> PathBuf {
    STATE_DIR_CACHE
        .get_or_init(|| {
            std::env::var(STATE_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    dirs::home_dir()
                        .map(|h| h.join(DEFAULT_STATE_DIR))
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
                })
        })
        .clone()
}

/// Get the config directory (`RELAY_CONFIG_DIR` or `<state>/config`).
pub fn config_dir() -> PathBuf {
    std::env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir().join(CONFIG_SUBDIR))
}

/// Get the logs directory.
pub fn logs_dir() -> PathBuf {
    state_dir().join(LOGS_SUBDIR)
}

/// Get the runtime state directory.
pub fn runtime_state_dir() -> PathBuf {
    state_dir().join(STATE_SUBDIR)
}

/// Environment file holding secrets (bot token, allowlist).
pub fn env_file() -> PathBuf {
    config_dir().join(".env")
}

/// Per-chat preferences (working directory, last conversation).
pub fn chats_file() -> PathBuf {
    runtime_state_dir().join("chats.json")
}

/// Ensure the state directory and all subdirectories exist.
///
/// # Errors
/// Returns an error if any directory cannot be created.
pub fn ensure_all_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(config_dir())?;
    std::fs::create_dir_all(logs_dir())?;
    std::fs::create_dir_all(runtime_state_dir())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_dir_shape() {
        let dir = state_dir();
        assert!(dir.is_absolute() || dir.ends_with(".claude-relay"));
    }

    #[test]
    fn test_runtime_state_dir_name() {
        assert!(runtime_state_dir().ends_with("state"));
    }

    #[test]
    fn test_logs_dir_name() {
        assert!(logs_dir().ends_with("logs"));
    }

    #[test]
    fn test_env_file_name() {
        assert!(env_file().ends_with(".env"));
    }

    #[test]
    fn test_chats_file_name() {
        let file = chats_file();
        assert!(file.ends_with("chats.json"));
        assert!(file.starts_with(runtime_state_dir()));
    }
}
