//! Claude Relay Core - shared configuration and text helpers.
//!
//! - **config**: state directory layout and well-known file paths
//! - **settings**: runtime settings loaded from the environment
//! - **format**: HTML escaping, truncation and message splitting for chat transports

pub mod config;
pub mod error;
pub mod format;
pub mod settings;

pub use config::{
    chats_file, config_dir, ensure_all_dirs, env_file, logs_dir, runtime_state_dir, state_dir,
};
pub use error::{ConfigError, Result};
pub use format::{
    format_cost, format_duration_ms, html_escape, split_message, truncate_chars,
    MAX_MESSAGE_LENGTH,
};
pub use settings::{PermissionMode, Settings, YoloScope};
