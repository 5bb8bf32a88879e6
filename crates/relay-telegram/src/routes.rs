//! Which chat owns which session, approval prompt and clarification.
//!
//! Shared between the approval notifier (which runs on the agent's task)
//! and the update handlers. Locks are synchronous and never held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use relay_models::{ApprovalId, SessionId};
use teloxide::types::{ChatId, MessageId};

/// An approval prompt posted to a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    /// HTML body of the prompt, without the keyboard.
    pub text: String,
}

#[derive(Debug, Default)]
struct Routes {
    session_chats: HashMap<SessionId, ChatId>,
    prompts: HashMap<ApprovalId, PromptRef>,
    clarifying: HashMap<ChatId, ApprovalId>,
}

/// Routing table between gate objects and Telegram chats.
#[derive(Debug, Default)]
pub struct ChatRouter {
    inner: RwLock<Routes>,
}

impl ChatRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Routes> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Routes> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that `session_id` reports to `chat_id`.
    pub fn bind(&self, session_id: SessionId, chat_id: ChatId) {
        self.write().session_chats.insert(session_id, chat_id);
    }

    /// Forget a finished session.
    pub fn unbind(&self, session_id: &SessionId) {
        self.write().session_chats.remove(session_id);
    }

    pub fn chat_for_session(&self, session_id: &SessionId) -> Option<ChatId> {
        self.read().session_chats.get(session_id).copied()
    }

    pub fn add_prompt(&self, approval_id: ApprovalId, prompt: PromptRef) {
        self.write().prompts.insert(approval_id, prompt);
    }

    pub fn prompt(&self, approval_id: &ApprovalId) -> Option<PromptRef> {
        self.read().prompts.get(approval_id).cloned()
    }

    /// Remove a prompt and any clarification waiting on it.
    pub fn close_prompt(&self, approval_id: &ApprovalId) -> Option<PromptRef> {
        let mut routes = self.write();
        routes.clarifying.retain(|_, id| id != approval_id);
        routes.prompts.remove(approval_id)
    }

    /// The chat's next text message answers `approval_id`.
    pub fn await_clarification(&self, chat_id: ChatId, approval_id: ApprovalId) {
        self.write().clarifying.insert(chat_id, approval_id);
    }

    /// Take the approval a chat is clarifying, if any.
    pub fn take_clarification(&self, chat_id: ChatId) -> Option<ApprovalId> {
        self.write().clarifying.remove(&chat_id)
    }

    pub fn clear_chat(&self, chat_id: ChatId) {
        self.write().clarifying.remove(&chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(chat: i64) -> PromptRef {
        PromptRef {
            chat_id: ChatId(chat),
            message_id: MessageId(7),
            text: "Approve?".to_string(),
        }
    }

    #[test]
    fn test_bind_and_unbind() {
        let router = ChatRouter::new();
        let session = SessionId::new();
        router.bind(session.clone(), ChatId(42));
        assert_eq!(router.chat_for_session(&session), Some(ChatId(42)));
        router.unbind(&session);
        assert_eq!(router.chat_for_session(&session), None);
    }

    #[test]
    fn test_close_prompt_clears_clarification() {
        let router = ChatRouter::new();
        let id = ApprovalId::new();
        router.add_prompt(id.clone(), prompt(1));
        router.await_clarification(ChatId(1), id.clone());

        assert_eq!(router.close_prompt(&id), Some(prompt(1)));
        assert!(router.take_clarification(ChatId(1)).is_none());
        assert!(router.prompt(&id).is_none());
    }

    #[test]
    fn test_take_clarification_once() {
        let router = ChatRouter::new();
        let id = ApprovalId::new();
        router.await_clarification(ChatId(5), id.clone());
        assert_eq!(router.take_clarification(ChatId(5)), Some(id));
        assert_eq!(router.take_clarification(ChatId(5)), None);
    }
}
