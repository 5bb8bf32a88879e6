//! Shared state for the Telegram bot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use relay_agent::{AgentConfig, AgentTask, ClaudeCli, SessionReport, TaskExecutor};
use relay_core::settings::expand_path;
use relay_core::{Settings, YoloScope};
use relay_gate::{AgentSession, Coordinator, GateConfig};
use relay_models::{ApprovalId, Choice, PendingApproval, SessionId};
use relay_stream::{OutputPresenter, StreamConfig};
use serde::{Deserialize, Serialize};
use teloxide::prelude::*;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TelegramError};
use crate::notifier::TelegramNotifier;
use crate::routes::ChatRouter;

/// What survives a restart for one chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SavedChat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
}

/// Per-chat state.
#[derive(Debug, Default)]
struct ChatState {
    /// Overrides the configured working directory.
    working_dir: Option<PathBuf>,
    /// Claude conversation the next task resumes.
    conversation_id: Option<String>,
    /// Start the next task with approve-all on.
    yolo: bool,
    /// The chat's running task.
    active: Option<Arc<AgentSession>>,
}

impl ChatState {
    fn saved(&self) -> SavedChat {
        SavedChat {
            working_dir: self.working_dir.clone(),
            conversation_id: self.conversation_id.clone(),
        }
    }
}

/// Snapshot of a chat for `/status`.
#[derive(Debug, Clone)]
pub struct ChatStatus {
    pub working_dir: PathBuf,
    pub conversation_id: Option<String>,
    pub yolo: bool,
    pub active: Option<Arc<AgentSession>>,
    pub pending: Option<PendingApproval>,
}

/// Whether an approval callback may act on a pending approval.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalLookup {
    /// Waiting, and its session reports to the asking chat.
    Owned(PendingApproval),
    /// Waiting, but on another chat's session.
    OtherChat,
    /// Already resolved, expired or unknown.
    Stale,
}

/// Load per-chat preferences from disk.
fn load_chats(path: &Path) -> HashMap<i64, ChatState> {
    if !path.exists() {
        return HashMap::new();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<HashMap<i64, SavedChat>>(&content) {
            Ok(saved) => {
                info!(count = saved.len(), "Loaded chat preferences from disk");
                saved
                    .into_iter()
                    .map(|(chat_id, s)| {
                        (
                            chat_id,
                            ChatState {
                                working_dir: s.working_dir,
                                conversation_id: s.conversation_id,
                                ..ChatState::default()
                            },
                        )
                    })
                    .collect()
            }
            Err(e) => {
                error!(error = %e, path = %path.display(), "Failed to parse chats file");
                HashMap::new()
            }
        },
        Err(e) => {
            error!(error = %e, path = %path.display(), "Failed to read chats file");
            HashMap::new()
        }
    }
}

/// Save per-chat preferences to disk.
fn save_chats(path: &Path, chats: &HashMap<i64, ChatState>) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!(error = %e, "Failed to create state directory");
            return;
        }
    }

    let saved: HashMap<i64, SavedChat> = chats
        .iter()
        .map(|(id, chat)| (*id, chat.saved()))
        .filter(|(_, s)| *s != SavedChat::default())
        .collect();

    match serde_json::to_string_pretty(&saved) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                error!(error = %e, path = %path.display(), "Failed to write chats file");
            } else {
                debug!(count = saved.len(), path = %path.display(), "Saved chats to disk");
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize chats");
        }
    }
}

/// Validate that a working directory exists, is a directory, and is accessible.
fn validate_working_dir(path: &Path) -> std::result::Result<(), String> {
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", path.display()));
    }

    if !path.is_dir() {
        return Err(format!("Not a directory: {}", path.display()));
    }

    if path.read_dir().is_err() {
        return Err(format!(
            "Cannot access directory: {} (permission denied)",
            path.display()
        ));
    }

    Ok(())
}

/// Shared state for the Telegram bot, accessible across all handlers.
pub struct TelegramState {
    settings: Settings,
    executor: TaskExecutor,
    routes: Arc<ChatRouter>,
    chats: RwLock<HashMap<i64, ChatState>>,
    chats_file: PathBuf,
}

impl TelegramState {
    /// Create state around an existing executor.
    pub fn new(
        settings: Settings,
        executor: TaskExecutor,
        routes: Arc<ChatRouter>,
        chats_file: impl Into<PathBuf>,
    ) -> Self {
        let chats_file = chats_file.into();
        let chats = load_chats(&chats_file);
        Self {
            settings,
            executor,
            routes,
            chats: RwLock::new(chats),
            chats_file,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        self.executor.coordinator()
    }

    pub fn routes(&self) -> &Arc<ChatRouter> {
        &self.routes
    }

    pub fn is_user_allowed(&self, user_id: u64) -> bool {
        self.settings.is_user_allowed(user_id)
    }

    async fn save(&self) {
        let chats = self.chats.read().await;
        save_chats(&self.chats_file, &chats);
    }

    /// Working directory for the chat's next task.
    pub async fn working_dir(&self, chat_id: ChatId) -> PathBuf {
        self.chats
            .read()
            .await
            .get(&chat_id.0)
            .and_then(|c| c.working_dir.clone())
            .unwrap_or_else(|| self.settings.working_dir.clone())
    }

    /// Change the chat's working directory.
    ///
    /// Relative paths resolve against the current one. The previous
    /// conversation belongs to the old directory and is forgotten.
    pub async fn set_working_dir(&self, chat_id: ChatId, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TelegramError::Command("Usage: /cd <path>".to_string()));
        }

        let current = self.working_dir(chat_id).await;
        let expanded = expand_path(raw);
        let target = if expanded.is_absolute() {
            expanded
        } else {
            current.join(expanded)
        };
        validate_working_dir(&target).map_err(TelegramError::Command)?;
        let target = target.canonicalize()?;

        {
            let mut chats = self.chats.write().await;
            let chat = chats.entry(chat_id.0).or_default();
            if chat.active.is_some() {
                return Err(TelegramError::Command(
                    "A task is running. /cancel it before changing directory.".to_string(),
                ));
            }
            chat.working_dir = Some(target.clone());
            chat.conversation_id = None;
        }
        self.save().await;

        info!(chat_id = %chat_id, dir = %target.display(), "Working directory changed");
        Ok(target)
    }

    /// Forget the conversation the next task would resume.
    pub async fn reset_conversation(&self, chat_id: ChatId) -> bool {
        let had = {
            let mut chats = self.chats.write().await;
            chats
                .get_mut(&chat_id.0)
                .and_then(|c| c.conversation_id.take())
                .is_some()
        };
        if had {
            self.save().await;
        }
        had
    }

    /// Look up a pending approval for a button press from `chat_id`.
    ///
    /// Decided from the correlation store, so a press that arrives before
    /// the prompt's send has returned still reaches the gate.
    pub fn approval_for_chat(&self, chat_id: ChatId, approval_id: &ApprovalId) -> ApprovalLookup {
        let Some(pending) = self.coordinator().decisions().pending(approval_id) else {
            return ApprovalLookup::Stale;
        };
        if self.routes.chat_for_session(&pending.session_id) == Some(chat_id) {
            ApprovalLookup::Owned(pending)
        } else {
            ApprovalLookup::OtherChat
        }
    }

    /// Resolve an approval with a typed reply: the answer to a question,
    /// otherwise instructions that replace the action.
    pub fn resolve_text_reply(&self, approval_id: &ApprovalId, text: &str) -> bool {
        let decisions = self.coordinator().decisions();
        let Some(pending) = decisions.pending(approval_id) else {
            return false;
        };
        let choice = if pending.action.is_question() {
            Choice::Answer(text.to_string())
        } else {
            Choice::Clarify(text.to_string())
        };
        decisions.resolve(approval_id, choice)
    }

    pub async fn active_session(&self, chat_id: ChatId) -> Option<Arc<AgentSession>> {
        self.chats
            .read()
            .await
            .get(&chat_id.0)
            .and_then(|c| c.active.clone())
    }

    /// Start a task for the chat, resuming its last conversation.
    ///
    /// `make_presenter` runs after the session is routed to the chat and
    /// before the agent starts. Fails if the chat already has a running task.
    pub async fn start_task<F>(
        &self,
        chat_id: ChatId,
        prompt: &str,
        make_presenter: F,
    ) -> Result<(Arc<AgentSession>, JoinHandle<SessionReport>)>
    where
        F: FnOnce(&SessionId) -> Arc<dyn OutputPresenter>,
    {
        let mut chats = self.chats.write().await;
        let chat = chats.entry(chat_id.0).or_default();
        if chat.active.is_some() {
            return Err(TelegramError::Command(
                "A task is already running. Wait for it or /cancel it.".to_string(),
            ));
        }

        let working_dir = chat
            .working_dir
            .clone()
            .unwrap_or_else(|| self.settings.working_dir.clone());
        let approve_all = match self.settings.yolo_scope {
            YoloScope::Session => std::mem::take(&mut chat.yolo),
            YoloScope::Chat => chat.yolo,
        };
        let mut task = AgentTask::new(prompt).with_approve_all(approve_all);
        if let Some(conversation_id) = &chat.conversation_id {
            task = task.with_resume(conversation_id.clone());
        }

        let routes = Arc::clone(&self.routes);
        let (session, handle) = self
            .executor
            .spawn_with(task, working_dir, move |session_id| {
                routes.bind(session_id.clone(), chat_id);
                make_presenter(session_id)
            })
            .await;

        chat.active = Some(Arc::clone(&session));
        info!(
            chat_id = %chat_id,
            session_id = %session.id(),
            approve_all,
            "Task started"
        );
        Ok((session, handle))
    }

    /// Record a finished task.
    pub async fn finish_task(&self, chat_id: ChatId, report: &SessionReport) {
        {
            let mut chats = self.chats.write().await;
            let chat = chats.entry(chat_id.0).or_default();
            if chat
                .active
                .as_ref()
                .is_some_and(|s| *s.id() == report.session_id)
            {
                chat.active = None;
            }
            if let Some(conversation_id) = report.conversation_id() {
                chat.conversation_id = Some(conversation_id.to_string());
            }
            if self.settings.yolo_scope == YoloScope::Chat {
                chat.yolo = report.approve_all;
            }
        }
        self.routes.unbind(&report.session_id);
        self.routes.clear_chat(chat_id);
        self.save().await;
    }

    /// Cancel the chat's running task. Returns false if nothing was running.
    pub async fn cancel(&self, chat_id: ChatId) -> bool {
        let Some(session) = self.active_session(chat_id).await else {
            return false;
        };
        match self.coordinator().cancel(session.id()).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                debug!(chat_id = %chat_id, error = %e, "Cancel raced with task end");
                false
            }
        }
    }

    /// Whether approve-all is on for the chat.
    pub async fn yolo_enabled(&self, chat_id: ChatId) -> bool {
        let chats = self.chats.read().await;
        let Some(chat) = chats.get(&chat_id.0) else {
            return false;
        };
        chat.yolo
            || chat
                .active
                .as_ref()
                .is_some_and(|s| s.approve_all_enabled())
    }

    /// Turn approve-all on or off.
    ///
    /// Turning it on applies to the running task and releases an approval it
    /// is waiting on. Turning it off revokes it immediately.
    pub async fn set_yolo(&self, chat_id: ChatId, on: bool) {
        let active = {
            let mut chats = self.chats.write().await;
            let chat = chats.entry(chat_id.0).or_default();
            match (&chat.active, self.settings.yolo_scope) {
                (Some(_), YoloScope::Session) => chat.yolo = false,
                _ => chat.yolo = on,
            }
            chat.active.clone()
        };

        let Some(session) = active else {
            info!(chat_id = %chat_id, on, "Approve-all set for next task");
            return;
        };

        if on {
            session.enable_approve_all();
            let coordinator = self.coordinator();
            if let Some(pending) = coordinator.store().pending_for_session(session.id()) {
                if coordinator.config().yolo.covers(&pending.action) {
                    coordinator
                        .decisions()
                        .resolve(&pending.approval_id, Choice::ApproveAll);
                }
            }
        } else if let Err(e) = self.coordinator().revoke_approve_all(session.id()).await {
            warn!(chat_id = %chat_id, error = %e, "Failed to revoke approve-all");
        }
        info!(chat_id = %chat_id, session_id = %session.id(), on, "Approve-all changed");
    }

    pub async fn status(&self, chat_id: ChatId) -> ChatStatus {
        let chats = self.chats.read().await;
        let chat = chats.get(&chat_id.0);
        let active = chat.and_then(|c| c.active.clone());
        let pending = active
            .as_ref()
            .and_then(|s| self.coordinator().store().pending_for_session(s.id()));

        ChatStatus {
            working_dir: chat
                .and_then(|c| c.working_dir.clone())
                .unwrap_or_else(|| self.settings.working_dir.clone()),
            conversation_id: chat.and_then(|c| c.conversation_id.clone()),
            yolo: chat.is_some_and(|c| c.yolo)
                || active.as_ref().is_some_and(|s| s.approve_all_enabled()),
            active,
            pending,
        }
    }
}

/// Build the full bot state: coordinator, approval notifier, Claude runtime
/// and executor, wired from `settings`.
pub fn create_shared_state(bot: Bot, settings: Settings, chats_file: PathBuf) -> Arc<TelegramState> {
    let routes = Arc::new(ChatRouter::new());
    let gate_config = GateConfig::from_settings(&settings);
    let notifier = TelegramNotifier::new(bot, Arc::clone(&routes), gate_config.clone());
    let coordinator = Arc::new(Coordinator::new(gate_config, Arc::new(notifier)));

    let runtime = ClaudeCli::new(AgentConfig::from_settings(&settings));
    let stream_config = StreamConfig::new()
        .with_window(settings.stream_window)
        .with_max_batch_bytes(settings.stream_max_batch_bytes);
    let executor = TaskExecutor::new(coordinator, Arc::new(runtime))
        .with_stream_config(stream_config)
        .with_permission_mode(settings.permission_mode);

    Arc::new(TelegramState::new(settings, executor, routes, chats_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_agent::{AgentRuntime, RunSummary};
    use relay_gate::{ChannelNotifier, GateEvent, PermissionGate};
    use relay_models::{ActionRequest, Decision, DenyReason, OutputBatch, SessionStatus};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Discard;

    #[async_trait]
    impl OutputPresenter for Discard {
        async fn present(&self, _batch: OutputBatch) -> relay_stream::Result<()> {
            Ok(())
        }
    }

    /// Asks once for `Bash`, then finishes in conversation "conv-7".
    struct AskOnce;

    #[async_trait]
    impl AgentRuntime for AskOnce {
        fn name(&self) -> &str {
            "ask-once"
        }

        async fn run(
            &self,
            _task: AgentTask,
            session: Arc<AgentSession>,
            gate: Arc<PermissionGate>,
        ) -> relay_agent::Result<RunSummary> {
            gate.request(&session, ActionRequest::new("Bash", "ls")).await;
            Ok(RunSummary {
                conversation_id: Some("conv-7".into()),
                ..RunSummary::default()
            })
        }
    }

    fn settings(dir: &Path, scope: YoloScope) -> Settings {
        let mut settings = Settings::from_lookup(|key| match key {
            "TELEGRAM_BOT_TOKEN" => Some("123:abc".to_string()),
            _ => None,
        })
        .unwrap();
        settings.working_dir = dir.to_path_buf();
        settings.yolo_scope = scope;
        settings
    }

    fn state(dir: &TempDir, scope: YoloScope) -> (TelegramState, mpsc::UnboundedReceiver<GateEvent>) {
        let (notifier, events) = ChannelNotifier::new();
        let coordinator = Arc::new(Coordinator::new(GateConfig::default(), Arc::new(notifier)));
        let executor = TaskExecutor::new(coordinator, Arc::new(AskOnce));
        let state = TelegramState::new(
            settings(dir.path(), scope),
            executor,
            Arc::new(ChatRouter::new()),
            dir.path().join("state/chats.json"),
        );
        (state, events)
    }

    fn discard(_: &SessionId) -> Arc<dyn OutputPresenter> {
        Arc::new(Discard)
    }

    #[test]
    fn test_validate_working_dir() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        assert!(validate_working_dir(dir.path()).is_ok());
        assert!(validate_working_dir(&file).unwrap_err().contains("Not a directory"));
        assert!(validate_working_dir(&dir.path().join("missing"))
            .unwrap_err()
            .contains("does not exist"));
    }

    #[tokio::test]
    async fn test_set_working_dir_persists() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("project")).unwrap();
        let chat = ChatId(10);

        {
            let (state, _events) = state(&dir, YoloScope::Session);
            let target = state.set_working_dir(chat, "project").await.unwrap();
            assert!(target.ends_with("project"));
            assert!(state.set_working_dir(chat, "nope").await.is_err());
        }

        let (reloaded, _events) = state(&dir, YoloScope::Session);
        assert!(reloaded.working_dir(chat).await.ends_with("project"));
        assert_eq!(reloaded.working_dir(ChatId(11)).await, dir.path());
    }

    #[tokio::test]
    async fn test_task_lifecycle_records_conversation() {
        let dir = TempDir::new().unwrap();
        let (state, mut events) = state(&dir, YoloScope::Session);
        let chat = ChatId(1);

        let (session, handle) = state.start_task(chat, "list files", discard).await.unwrap();
        assert_eq!(state.routes().chat_for_session(session.id()), Some(chat));
        assert!(state.start_task(chat, "again", discard).await.is_err());

        let Some(GateEvent::ApprovalRequested(pending)) = events.recv().await else {
            panic!("expected approval request");
        };
        assert!(state.status(chat).await.pending.is_some());
        state
            .coordinator()
            .decisions()
            .resolve(&pending.approval_id, Choice::Approve);

        let report = handle.await.unwrap();
        assert_eq!(report.status, SessionStatus::Completed);
        state.finish_task(chat, &report).await;

        let status = state.status(chat).await;
        assert!(status.active.is_none());
        assert_eq!(status.conversation_id.as_deref(), Some("conv-7"));
        assert_eq!(state.routes().chat_for_session(session.id()), None);

        assert!(state.reset_conversation(chat).await);
        assert!(!state.reset_conversation(chat).await);
    }

    #[tokio::test]
    async fn test_yolo_releases_pending_approval() {
        let dir = TempDir::new().unwrap();
        let (state, mut events) = state(&dir, YoloScope::Session);
        let chat = ChatId(2);

        let (session, handle) = state.start_task(chat, "go", discard).await.unwrap();
        events.recv().await.unwrap();
        state.set_yolo(chat, true).await;
        assert!(session.approve_all_enabled());

        let report = handle.await.unwrap();
        assert_eq!(report.status, SessionStatus::Completed);
        assert!(report.approve_all);
        state.finish_task(chat, &report).await;

        // Session scope: the grant ended with the task.
        assert!(!state.yolo_enabled(chat).await);
    }

    #[tokio::test]
    async fn test_chat_scope_yolo_carries_over() {
        let dir = TempDir::new().unwrap();
        let (state, mut events) = state(&dir, YoloScope::Chat);
        let chat = ChatId(3);

        state.set_yolo(chat, true).await;
        let (session, handle) = state.start_task(chat, "go", discard).await.unwrap();
        assert!(session.approve_all_enabled());
        let report = handle.await.unwrap();
        state.finish_task(chat, &report).await;
        assert!(events.try_recv().is_err());
        assert!(state.yolo_enabled(chat).await);

        state.set_yolo(chat, false).await;
        assert!(!state.yolo_enabled(chat).await);
    }

    #[tokio::test]
    async fn test_approval_lookup_uses_pending_store() {
        let dir = TempDir::new().unwrap();
        let (state, mut events) = state(&dir, YoloScope::Session);
        let chat = ChatId(5);

        let (_session, handle) = state.start_task(chat, "go", discard).await.unwrap();
        let Some(GateEvent::ApprovalRequested(pending)) = events.recv().await else {
            panic!("expected approval request");
        };
        let id = pending.approval_id.clone();

        // No prompt message is recorded yet; the press still counts.
        assert!(state.routes().prompt(&id).is_none());
        assert_eq!(state.approval_for_chat(chat, &id), ApprovalLookup::Owned(pending));
        assert_eq!(state.approval_for_chat(ChatId(6), &id), ApprovalLookup::OtherChat);

        assert!(state.coordinator().decisions().resolve(&id, Choice::Approve));
        assert_eq!(state.approval_for_chat(chat, &id), ApprovalLookup::Stale);
        assert_eq!(
            state.approval_for_chat(chat, &ApprovalId::new()),
            ApprovalLookup::Stale
        );
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_text_reply_answers_questions() {
        let dir = TempDir::new().unwrap();
        let (state, mut events) = state(&dir, YoloScope::Session);
        let (session, _out) = state.coordinator().start_session(dir.path()).await;

        let gate = state.coordinator().gate();
        let asking = Arc::clone(&session);
        let question = tokio::spawn(async move {
            gate.request(&asking, ActionRequest::question("Which db?", vec!["sqlite".into()]))
                .await
        });
        let Some(GateEvent::ApprovalRequested(pending)) = events.recv().await else {
            panic!("expected question");
        };
        assert!(state.resolve_text_reply(&pending.approval_id, "duckdb"));
        assert_eq!(question.await.unwrap(), Decision::Answered("duckdb".into()));

        let gate = state.coordinator().gate();
        let asking = Arc::clone(&session);
        let tool = tokio::spawn(async move {
            gate.request(&asking, ActionRequest::new("Bash", "ls")).await
        });
        let pending = loop {
            if let Some(GateEvent::ApprovalRequested(p)) = events.recv().await {
                break p;
            }
        };
        assert!(state.resolve_text_reply(&pending.approval_id, "use ls -la"));
        assert_eq!(
            tool.await.unwrap(),
            Decision::Denied(DenyReason::Clarified("use ls -la".into()))
        );
        assert!(!state.resolve_text_reply(&pending.approval_id, "late"));
    }

    #[tokio::test]
    async fn test_cancel_without_task() {
        let dir = TempDir::new().unwrap();
        let (state, _events) = state(&dir, YoloScope::Session);
        assert!(!state.cancel(ChatId(4)).await);
    }
}
