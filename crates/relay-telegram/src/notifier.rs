//! Approval prompts posted to Telegram.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{format_duration_ms, html_escape, truncate_chars};
use relay_gate::{ApprovalNotifier, GateConfig, GateError};
use relay_models::{Decision, PendingApproval};
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{debug, info, warn};

use crate::callback::{approval_keyboard, question_keyboard};
use crate::routes::{ChatRouter, PromptRef};

const MAX_DESCRIPTION_CHARS: usize = 3000;

/// HTML body of an approval prompt.
pub fn prompt_text(approval: &PendingApproval, config: &GateConfig) -> String {
    let action = &approval.action;
    let expires = format_duration_ms(config.timeout_for(action).as_millis() as u64);
    let description = html_escape(&truncate_chars(&action.description, MAX_DESCRIPTION_CHARS));

    if action.is_question() {
        return format!(
            "❓ <b>Claude asks</b>\n\n{}\n\nPick an option or send your own answer.\n\n⏱ expires in {} · <code>{}</code>",
            description,
            expires,
            approval.approval_id.short()
        );
    }

    let header = if action.is_plan() {
        "📋 <b>Plan ready for review</b>".to_string()
    } else {
        format!(
            "🔐 <b>Approval needed</b>\n{} {} risk · <code>{}</code>",
            action.risk.emoji(),
            action.risk,
            html_escape(&action.tool_name)
        )
    };

    format!(
        "{}\n\n<pre>{}</pre>\n\n⏱ expires in {} · <code>{}</code>",
        header,
        description,
        expires,
        approval.approval_id.short()
    )
}

/// Posts approval prompts with an inline keyboard and marks them closed.
pub struct TelegramNotifier {
    bot: Bot,
    routes: Arc<ChatRouter>,
    config: GateConfig,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, routes: Arc<ChatRouter>, config: GateConfig) -> Self {
        Self {
            bot,
            routes,
            config,
        }
    }
}

#[async_trait]
impl ApprovalNotifier for TelegramNotifier {
    async fn approval_requested(&self, approval: &PendingApproval) -> relay_gate::Result<()> {
        let chat_id = self
            .routes
            .chat_for_session(&approval.session_id)
            .ok_or_else(|| GateError::Notify(format!("no chat for {}", approval.session_id)))?;

        let text = prompt_text(approval, &self.config);
        let keyboard = if approval.action.is_question() {
            question_keyboard(&approval.approval_id, &approval.action.options)
        } else {
            approval_keyboard(&approval.approval_id)
        };
        let sent = self
            .bot
            .send_message(chat_id, &text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard)
            .await
            .map_err(|e| GateError::Notify(e.to_string()))?;

        info!(
            chat_id = %chat_id,
            approval_id = %approval.approval_id.short(),
            "Approval prompt sent"
        );
        self.routes.add_prompt(
            approval.approval_id.clone(),
            PromptRef {
                chat_id,
                message_id: sent.id,
                text,
            },
        );
        Ok(())
    }

    async fn approval_closed(&self, approval: &PendingApproval, decision: &Decision) {
        let Some(prompt) = self.routes.close_prompt(&approval.approval_id) else {
            debug!(approval_id = %approval.approval_id.short(), "No prompt to update");
            return;
        };

        // Editing without a reply markup also removes the keyboard.
        let text = format!("{}\n\n<b>{}</b>", prompt.text, decision.label());
        if let Err(e) = self
            .bot
            .edit_message_text(prompt.chat_id, prompt.message_id, text)
            .parse_mode(ParseMode::Html)
            .await
        {
            warn!(chat_id = %prompt.chat_id, error = %e, "Failed to update approval prompt");
        }
    }
}
