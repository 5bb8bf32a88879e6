//! Command, message and callback handlers for the Telegram bot.

use std::sync::Arc;

use chrono::Utc;
use relay_agent::SessionReport;
use relay_core::{format_duration_ms, html_escape, truncate_chars, MAX_MESSAGE_LENGTH};
use relay_models::{Choice, SessionStatus};
use relay_stream::{OutputPresenter, RelayStats};
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MaybeInaccessibleMessage, ParseMode};
use teloxide::utils::command::BotCommands;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::callback::{button_choice, CallbackAction, PromptButton};
use crate::error::TelegramError;
use crate::presenter::{summary_text, TelegramPresenter};
use crate::state::{ApprovalLookup, TelegramState};

const UNAUTHORIZED: &str = "⛔ You are not authorized to use this bot.";

/// Bot commands that can be invoked with /.
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Start the bot and get help")]
    Start,

    #[command(description = "Show help message")]
    Help,

    #[command(description = "Cancel the running task")]
    Cancel,

    #[command(description = "Approve every action without asking: /yolo [on|off]")]
    Yolo(String),

    #[command(description = "Show task and directory status")]
    Status,

    #[command(description = "Change working directory: /cd <path>")]
    Cd(String),

    #[command(description = "Start a fresh conversation")]
    New,

    #[command(description = "Show the working directory")]
    Pwd,
}

/// Returns true if the message sender is on the allowlist.
fn is_authorized(msg: &Message, state: &TelegramState) -> bool {
    msg.from
        .as_ref()
        .is_some_and(|u| state.is_user_allowed(u.id.0))
}

async fn refuse(bot: &Bot, msg: &Message) -> ResponseResult<()> {
    warn!(
        chat_id = %msg.chat.id,
        user = ?msg.from.as_ref().map(|u| u.id.0),
        "Unauthorized message"
    );
    bot.send_message(msg.chat.id, UNAUTHORIZED).await?;
    Ok(())
}

/// Handle the /start command.
pub async fn handle_start(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    let dir = state.working_dir(msg.chat.id).await;
    let welcome = format!(
        "Welcome to Claude Relay! 🤖\n\n\
        Send a message and Claude Code works on it in your project. \
        Actions that change things wait for your approval here.\n\n\
        <b>Working directory:</b> <code>{}</code>\n\n\
        <b>Getting Started:</b>\n\
        1. Use /cd &lt;path&gt; to pick a project\n\
        2. Describe the task in a message\n\
        3. Approve, deny or clarify each action\n\
        4. Use /cancel to stop, /new to start over\n\n\
        Type /help for all commands.",
        html_escape(&dir.display().to_string())
    );

    bot.send_message(msg.chat.id, welcome)
        .parse_mode(ParseMode::Html)
        .await?;

    info!(chat_id = %msg.chat.id, user = ?msg.from.as_ref().map(|u| &u.username), "User started bot");
    Ok(())
}

/// Handle the /help command.
pub async fn handle_help(bot: Bot, msg: Message) -> ResponseResult<()> {
    let help_text = Command::descriptions().to_string();
    bot.send_message(msg.chat.id, help_text).await?;
    Ok(())
}

/// Handle the /cancel command.
pub async fn handle_cancel(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    let text = if state.cancel(msg.chat.id).await {
        "🛑 Cancelling..."
    } else {
        "No task is running."
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Handle the /yolo command.
pub async fn handle_yolo(
    bot: Bot,
    msg: Message,
    state: Arc<TelegramState>,
    arg: String,
) -> ResponseResult<()> {
    let on = match arg.trim().to_ascii_lowercase().as_str() {
        "" => !state.yolo_enabled(msg.chat.id).await,
        "on" => true,
        "off" => false,
        _ => {
            bot.send_message(msg.chat.id, "Usage: /yolo [on|off]").await?;
            return Ok(());
        }
    };

    state.set_yolo(msg.chat.id, on).await;

    let text = match (on, state.coordinator().config().yolo.exempt_plans) {
        (true, true) => "⚡ Approve-all is <b>on</b>. Plans still need review.",
        (true, false) => "⚡ Approve-all is <b>on</b>.",
        (false, _) => "🔐 Approve-all is <b>off</b>. Every action asks again.",
    };
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Handle the /status command.
pub async fn handle_status(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    let status = state.status(msg.chat.id).await;

    let mut text = format!(
        "<b>Status</b>\n\n📁 <code>{}</code>\n🧵 Conversation: {}\n⚡ Approve-all: {}",
        html_escape(&status.working_dir.display().to_string()),
        status
            .conversation_id
            .as_deref()
            .map(|c| format!("<code>{}</code>", html_escape(c)))
            .unwrap_or_else(|| "new".to_string()),
        if status.yolo { "on" } else { "off" },
    );

    match &status.active {
        Some(session) => {
            let elapsed = (Utc::now() - session.created_at())
                .num_milliseconds()
                .max(0) as u64;
            text.push_str(&format!(
                "\n▶️ Task <code>{}</code>: {} for {}",
                session.id().short(),
                session.status(),
                format_duration_ms(elapsed)
            ));
        }
        None => text.push_str("\n💤 No task running"),
    }

    if let Some(pending) = &status.pending {
        text.push_str(&format!(
            "\n🔐 Waiting on <code>{}</code> ({})",
            html_escape(&pending.action.tool_name),
            pending.approval_id.short()
        ));
    }

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Handle the /cd command.
pub async fn handle_cd(
    bot: Bot,
    msg: Message,
    state: Arc<TelegramState>,
    path: String,
) -> ResponseResult<()> {
    match state.set_working_dir(msg.chat.id, &path).await {
        Ok(dir) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "📁 Working directory: <code>{}</code>\nThe next message starts a new conversation.",
                    html_escape(&dir.display().to_string())
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        Err(e) => {
            bot.send_message(msg.chat.id, format!("❌ {}", e)).await?;
        }
    }
    Ok(())
}

/// Handle the /new command.
pub async fn handle_new(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    let text = if state.reset_conversation(msg.chat.id).await {
        "🧵 Conversation cleared. The next message starts fresh."
    } else {
        "🧵 Already on a fresh conversation."
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Handle the /pwd command.
pub async fn handle_pwd(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    let dir = state.working_dir(msg.chat.id).await;
    bot.send_message(
        msg.chat.id,
        format!("📁 <code>{}</code>", html_escape(&dir.display().to_string())),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

/// Route a parsed command to its handler.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<TelegramState>,
) -> ResponseResult<()> {
    if !is_authorized(&msg, &state) {
        return refuse(&bot, &msg).await;
    }

    match cmd {
        Command::Start => handle_start(bot, msg, state).await,
        Command::Help => handle_help(bot, msg).await,
        Command::Cancel => handle_cancel(bot, msg, state).await,
        Command::Yolo(arg) => handle_yolo(bot, msg, state, arg).await,
        Command::Status => handle_status(bot, msg, state).await,
        Command::Cd(path) => handle_cd(bot, msg, state, path).await,
        Command::New => handle_new(bot, msg, state).await,
        Command::Pwd => handle_pwd(bot, msg, state).await,
    }
}

/// Handle plain text: answers a pending clarification, otherwise starts a task.
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<TelegramState>) -> ResponseResult<()> {
    if !is_authorized(&msg, &state) {
        return refuse(&bot, &msg).await;
    }
    let Some(text) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    let chat_id = msg.chat.id;

    if let Some(approval_id) = state.routes().take_clarification(chat_id) {
        let reply = if state.resolve_text_reply(&approval_id, text) {
            "💬 Sent to Claude."
        } else {
            "⌛ That approval already expired."
        };
        bot.send_message(chat_id, reply).await?;
        return Ok(());
    }

    let presenter_bot = bot.clone();
    let started = state
        .start_task(chat_id, text, move |session_id| {
            Arc::new(TelegramPresenter::new(presenter_bot, chat_id, Some(session_id)))
                as Arc<dyn OutputPresenter>
        })
        .await;

    match started {
        Ok((session, handle)) => {
            let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
            debug!(chat_id = %chat_id, session_id = %session.id(), "Waiting for task report");
            tokio::spawn(report_when_done(bot, chat_id, state, session.id().clone(), handle));
        }
        Err(TelegramError::Command(reason)) => {
            bot.send_message(chat_id, reason).await?;
        }
        Err(e) => {
            error!(chat_id = %chat_id, error = %e, "Failed to start task");
            bot.send_message(chat_id, format!("❌ Could not start task: {}", e))
                .await?;
        }
    }
    Ok(())
}

/// Wait for a task's report, record it and post the summary.
async fn report_when_done(
    bot: Bot,
    chat_id: ChatId,
    state: Arc<TelegramState>,
    session_id: relay_models::SessionId,
    handle: JoinHandle<SessionReport>,
) {
    let report = match handle.await {
        Ok(report) => report,
        Err(e) => {
            error!(chat_id = %chat_id, session_id = %session_id, error = %e, "Task panicked");
            SessionReport {
                session_id,
                status: SessionStatus::Failed,
                summary: Default::default(),
                error: Some("task crashed".to_string()),
                approve_all: false,
                relay: RelayStats::default(),
            }
        }
    };

    state.finish_task(chat_id, &report).await;

    let summary = truncate_chars(&summary_text(&report), MAX_MESSAGE_LENGTH);
    if let Err(e) = bot.send_message(chat_id, summary).await {
        warn!(chat_id = %chat_id, error = %e, "Failed to send task summary");
    }
}

/// Handle inline keyboard presses on approval prompts and task output.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<TelegramState>,
) -> ResponseResult<()> {
    if !state.is_user_allowed(q.from.id.0) {
        bot.answer_callback_query(q.id.clone()).text("Unauthorized.").await?;
        return Ok(());
    }

    let chat_id = match &q.message {
        Some(MaybeInaccessibleMessage::Regular(m)) => m.chat.id,
        Some(MaybeInaccessibleMessage::Inaccessible(m)) => m.chat.id,
        None => {
            bot.answer_callback_query(q.id.clone()).await?;
            return Ok(());
        }
    };

    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        warn!(chat_id = %chat_id, data = ?q.data, "Unrecognized callback data");
        bot.answer_callback_query(q.id.clone()).text("Unknown action.").await?;
        return Ok(());
    };

    let answer = match action {
        CallbackAction::Prompt {
            button,
            approval_id,
        } => {
            match state.approval_for_chat(chat_id, &approval_id) {
                ApprovalLookup::Stale => {
                    warn!(approval_id = %approval_id, "Stale approval callback");
                    "⌛ This request has expired."
                }
                ApprovalLookup::OtherChat => {
                    warn!(chat_id = %chat_id, approval_id = %approval_id, "Approval callback from another chat");
                    "Not your request."
                }
                ApprovalLookup::Owned(pending) => match button_choice(button, &pending.action) {
                    None if button == PromptButton::Clarify => {
                        let ask = if pending.action.is_question() {
                            "💬 Type your answer."
                        } else {
                            "💬 Send your instructions. Claude gets them instead of running this action."
                        };
                        state.routes().await_clarification(chat_id, approval_id);
                        bot.send_message(chat_id, ask).await?;
                        "Waiting for your message."
                    }
                    None => "Unknown option.",
                    Some(choice) => {
                        let label = match &choice {
                            Choice::Approve => "Approved",
                            Choice::ApproveAll => "Approve-all on",
                            Choice::Answer(_) => "Answered",
                            _ => "Denied",
                        };
                        if state.coordinator().decisions().resolve(&approval_id, choice) {
                            label
                        } else {
                            "⌛ This request has expired."
                        }
                    }
                },
            }
        }
        CallbackAction::CancelTask(session_id) => {
            if state.routes().chat_for_session(&session_id) != Some(chat_id) {
                "Task already finished."
            } else {
                match state.coordinator().cancel(&session_id).await {
                    Ok(true) => "🛑 Cancelling...",
                    Ok(false) | Err(_) => "Task already finished.",
                }
            }
        }
    };

    bot.answer_callback_query(q.id.clone()).text(answer).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert!(matches!(Command::parse("/cancel", "relay_bot"), Ok(Command::Cancel)));
        assert!(matches!(Command::parse("/new", "relay_bot"), Ok(Command::New)));
        assert!(matches!(
            Command::parse("/cd ~/src/app", "relay_bot"),
            Ok(Command::Cd(p)) if p == "~/src/app"
        ));
        assert!(matches!(
            Command::parse("/yolo off", "relay_bot"),
            Ok(Command::Yolo(a)) if a == "off"
        ));
        assert!(matches!(
            Command::parse("/yolo", "relay_bot"),
            Ok(Command::Yolo(a)) if a.is_empty()
        ));
        assert!(Command::parse("/connect x", "relay_bot").is_err());
    }

    #[test]
    fn test_help_lists_commands() {
        let help = Command::descriptions().to_string();
        for cmd in ["/start", "/cancel", "/yolo", "/status", "/cd", "/new", "/pwd"] {
            assert!(help.contains(cmd), "missing {}", cmd);
        }
    }
}
