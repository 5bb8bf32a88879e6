//! Telegram front end for Claude Relay.
//!
//! Each chat runs one Claude Code task at a time. Output streams into an
//! edited message, and every side-effecting tool call is posted as an
//! approval prompt with Approve / Deny / Approve all / Clarify buttons.
//!
//! # Environment Variables
//!
//! Required:
//! - `TELEGRAM_BOT_TOKEN`: Bot token from @BotFather
//!
//! Optional:
//! - `ALLOWED_USER_IDS`: Comma separated Telegram user ids (empty = anyone)
//! - `CLAUDE_WORKING_DIR`, `CLAUDE_PATH`, `CLAUDE_MODEL`, `CLAUDE_MAX_TURNS`
//! - `CLAUDE_PERMISSION_MODE`: `default`, `acceptEdits` or `bypassPermissions`
//! - `APPROVAL_TIMEOUT_SECS`, `PLAN_TIMEOUT_SECS`, `YOLO_SCOPE`
//!
//! # Example
//!
//! ```no_run
//! use relay_core::Settings;
//! use relay_telegram::TelegramBot;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bot = TelegramBot::new(Settings::from_env()?)?;
//!     bot.start_polling().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Commands
//!
//! - `/start`, `/help`
//! - `/cancel` - Stop the running task
//! - `/yolo [on|off]` - Approve every action without asking
//! - `/status` - Task, directory and approval status
//! - `/cd <path>`, `/pwd` - Working directory
//! - `/new` - Forget the conversation being resumed

pub mod bot;
pub mod callback;
pub mod error;
pub mod handlers;
pub mod notifier;
pub mod presenter;
pub mod routes;
pub mod state;

pub use bot::TelegramBot;
pub use callback::{
    approval_keyboard, cancel_keyboard, question_keyboard, CallbackAction, PromptButton,
};
pub use error::{Result, TelegramError};
pub use notifier::{prompt_text, TelegramNotifier};
pub use presenter::{summary_text, TelegramPresenter};
pub use routes::{ChatRouter, PromptRef};
pub use state::{create_shared_state, ApprovalLookup, ChatStatus, TelegramState};
