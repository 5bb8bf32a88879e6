//! Live task output in Telegram.
//!
//! Output accumulates in one message that is edited as batches arrive. When
//! it outgrows [`MAX_MESSAGE_LENGTH`] the full part is left in place and a
//! continuation message is started. The newest message carries the cancel
//! button until the final batch.

use async_trait::async_trait;
use relay_agent::SessionReport;
use relay_core::{format_cost, format_duration_ms, split_message, MAX_MESSAGE_LENGTH};
use relay_models::{OutputBatch, SessionId, SessionStatus};
use relay_stream::{OutputPresenter, StreamError};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MessageId};
use teloxide::{ApiError, RequestError};
use tokio::sync::Mutex;
use tracing::debug;

use crate::callback::cancel_keyboard;

/// Map a Bot API failure onto the relay's retry contract.
pub fn stream_error(e: RequestError) -> StreamError {
    match e {
        RequestError::RetryAfter(secs) => StreamError::RateLimited(secs.duration()),
        other => StreamError::Presenter(other.to_string()),
    }
}

fn not_modified(e: &RequestError) -> bool {
    matches!(e, RequestError::Api(ApiError::MessageNotModified))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rendered {
    message_id: MessageId,
    text: String,
    cancel_button: bool,
}

#[derive(Debug, Default)]
struct View {
    /// Text of the messages in `rendered`, in order.
    pending: String,
    rendered: Vec<Rendered>,
    last_sequence: Option<u64>,
}

impl View {
    /// Append a batch once; a retried batch is not appended twice.
    fn apply(&mut self, batch: &OutputBatch) {
        if self.last_sequence.map_or(true, |seq| batch.last_sequence > seq) {
            self.pending.push_str(&batch.text);
            self.last_sequence = Some(batch.last_sequence);
        }
    }

    /// Keep only the newest message once everything is rendered.
    fn compact(&mut self) {
        if self.rendered.len() > 1 {
            let last = self.rendered.len() - 1;
            self.rendered.drain(..last);
            self.pending = self.rendered[0].text.clone();
        }
    }
}

/// Streams one session's output into a chat.
pub struct TelegramPresenter {
    bot: Bot,
    chat_id: ChatId,
    keyboard: Option<InlineKeyboardMarkup>,
    view: Mutex<View>,
}

impl TelegramPresenter {
    pub fn new(bot: Bot, chat_id: ChatId, session_id: Option<&SessionId>) -> Self {
        Self {
            bot,
            chat_id,
            keyboard: session_id.map(cancel_keyboard),
            view: Mutex::new(View::default()),
        }
    }

    async fn send(&self, text: &str, cancel_button: bool) -> Result<MessageId, RequestError> {
        let mut req = self.bot.send_message(self.chat_id, text);
        if let (true, Some(kb)) = (cancel_button, &self.keyboard) {
            req = req.reply_markup(kb.clone());
        }
        req.await.map(|m| m.id)
    }

    async fn edit(&self, id: MessageId, text: &str, cancel_button: bool) -> Result<(), RequestError> {
        let mut req = self.bot.edit_message_text(self.chat_id, id, text);
        if let (true, Some(kb)) = (cancel_button, &self.keyboard) {
            req = req.reply_markup(kb.clone());
        }
        match req.await {
            Ok(_) => Ok(()),
            Err(e) if not_modified(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl OutputPresenter for TelegramPresenter {
    async fn present(&self, batch: OutputBatch) -> relay_stream::Result<()> {
        let mut view = self.view.lock().await;
        view.apply(&batch);

        let parts: Vec<String> = split_message(&view.pending, MAX_MESSAGE_LENGTH)
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect();
        let count = parts.len();

        for (i, part) in parts.into_iter().enumerate() {
            let cancel_button = i + 1 == count && !batch.is_final && self.keyboard.is_some();

            match view.rendered.get(i).cloned() {
                Some(current) if current.text == part && current.cancel_button == cancel_button => {}
                Some(current) => {
                    self.edit(current.message_id, &part, cancel_button)
                        .await
                        .map_err(stream_error)?;
                    view.rendered[i] = Rendered {
                        message_id: current.message_id,
                        text: part,
                        cancel_button,
                    };
                }
                None => {
                    let message_id = self.send(&part, cancel_button).await.map_err(stream_error)?;
                    view.rendered.push(Rendered {
                        message_id,
                        text: part,
                        cancel_button,
                    });
                }
            }
        }

        debug!(
            chat_id = %self.chat_id,
            sequence = batch.last_sequence,
            messages = view.rendered.len(),
            "Output presented"
        );
        view.compact();
        Ok(())
    }
}

/// One-line outcome message for a finished task.
pub fn summary_text(report: &SessionReport) -> String {
    match report.status {
        SessionStatus::Completed => {
            let mut line = "✅ Completed".to_string();
            if let Some(cost) = report.summary.cost_usd {
                line.push_str(&format!(" · {}", format_cost(cost)));
            }
            if let Some(turns) = report.summary.num_turns {
                line.push_str(&format!(
                    " · {} turn{}",
                    turns,
                    if turns == 1 { "" } else { "s" }
                ));
            }
            if let Some(ms) = report.summary.duration_ms {
                line.push_str(&format!(" · {}", format_duration_ms(ms)));
            }
            line
        }
        SessionStatus::Cancelled => "🛑 Cancelled".to_string(),
        _ => format!(
            "❌ Failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
