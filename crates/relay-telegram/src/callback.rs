//! Inline keyboard callback data.
//!
//! Formats: `hitl:<approve|deny|all|clarify|opt<N>>:<approval_id>` and
//! `task:cancel:<session_id>`. Telegram limits callback data to 64 bytes.

use relay_core::truncate_chars;
use relay_models::{ActionRequest, ApprovalId, Choice, SessionId};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Telegram's callback data limit.
pub const MAX_CALLBACK_BYTES: usize = 64;

/// Options offered as buttons on a question.
pub const MAX_QUESTION_OPTIONS: usize = 10;

const MAX_OPTION_LABEL_CHARS: usize = 40;

/// Button pressed on an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptButton {
    Approve,
    Deny,
    ApproveAll,
    Clarify,
    /// One of a question's options, by position.
    Option(u8),
}

impl PromptButton {
    fn code(self) -> String {
        match self {
            Self::Approve => "approve".to_string(),
            Self::Deny => "deny".to_string(),
            Self::ApproveAll => "all".to_string(),
            Self::Clarify => "clarify".to_string(),
            Self::Option(index) => format!("opt{}", index),
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "approve" => Some(Self::Approve),
            "deny" => Some(Self::Deny),
            "all" => Some(Self::ApproveAll),
            "clarify" => Some(Self::Clarify),
            other => {
                let index: u8 = other.strip_prefix("opt")?.parse().ok()?;
                (usize::from(index) < MAX_QUESTION_OPTIONS).then_some(Self::Option(index))
            }
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Approve => "✅ Approve",
            Self::Deny => "❌ Deny",
            Self::ApproveAll => "⚡ Approve all",
            Self::Clarify => "💬 Clarify",
            Self::Option(_) => "🔘",
        }
    }
}

/// The choice a button press makes on `action`. `Clarify` asks for a typed
/// reply first and an option outside the question's range means nothing.
pub fn button_choice(button: PromptButton, action: &ActionRequest) -> Option<Choice> {
    match button {
        PromptButton::Approve => Some(Choice::Approve),
        PromptButton::Deny => Some(Choice::Deny),
        PromptButton::ApproveAll => Some(Choice::ApproveAll),
        PromptButton::Clarify => None,
        PromptButton::Option(index) => action
            .options
            .get(usize::from(index))
            .map(|label| Choice::Answer(label.clone())),
    }
}

/// A decoded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Prompt {
        button: PromptButton,
        approval_id: ApprovalId,
    },
    CancelTask(SessionId),
}

impl CallbackAction {
    /// Encode as callback data.
    pub fn encode(&self) -> String {
        match self {
            Self::Prompt {
                button,
                approval_id,
            } => format!("hitl:{}:{}", button.code(), approval_id),
            Self::CancelTask(session_id) => format!("task:cancel:{}", session_id),
        }
    }

    /// Decode callback data; unknown formats yield `None`.
    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.splitn(3, ':');
        let (kind, verb, id) = (parts.next()?, parts.next()?, parts.next()?);
        if id.is_empty() {
            return None;
        }
        match (kind, verb) {
            ("hitl", code) => Some(Self::Prompt {
                button: PromptButton::from_code(code)?,
                approval_id: ApprovalId::from_string(id),
            }),
            ("task", "cancel") => Some(Self::CancelTask(SessionId::from_string(id))),
            _ => None,
        }
    }
}

/// Keyboard attached to an approval prompt.
pub fn approval_keyboard(approval_id: &ApprovalId) -> InlineKeyboardMarkup {
    let button = |b: PromptButton| {
        InlineKeyboardButton::callback(
            b.label(),
            CallbackAction::Prompt {
                button: b,
                approval_id: approval_id.clone(),
            }
            .encode(),
        )
    };
    InlineKeyboardMarkup::new(vec![
        vec![button(PromptButton::Approve), button(PromptButton::Deny)],
        vec![button(PromptButton::ApproveAll), button(PromptButton::Clarify)],
    ])
}

/// Keyboard attached to a question: one button per option, then a free-text
/// answer and a skip.
pub fn question_keyboard(approval_id: &ApprovalId, options: &[String]) -> InlineKeyboardMarkup {
    let button = |label: String, b: PromptButton| {
        InlineKeyboardButton::callback(
            label,
            CallbackAction::Prompt {
                button: b,
                approval_id: approval_id.clone(),
            }
            .encode(),
        )
    };
    let mut rows: Vec<Vec<InlineKeyboardButton>> = options
        .iter()
        .take(MAX_QUESTION_OPTIONS)
        .enumerate()
        .map(|(i, label)| {
            vec![button(
                truncate_chars(label, MAX_OPTION_LABEL_CHARS),
                PromptButton::Option(i as u8),
            )]
        })
        .collect();
    rows.push(vec![
        button("💬 Other answer".to_string(), PromptButton::Clarify),
        button("⏭ Skip".to_string(), PromptButton::Deny),
    ]);
    InlineKeyboardMarkup::new(rows)
}

/// Keyboard attached to a running task's output.
pub fn cancel_keyboard(session_id: &SessionId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🛑 Cancel",
        CallbackAction::CancelTask(session_id.clone()).encode(),
    )]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt_buttons() {
        let id = ApprovalId::new();
        for button in [
            PromptButton::Approve,
            PromptButton::Deny,
            PromptButton::ApproveAll,
            PromptButton::Clarify,
            PromptButton::Option(0),
            PromptButton::Option(9),
        ] {
            let action = CallbackAction::Prompt {
                button,
                approval_id: id.clone(),
            };
            assert_eq!(CallbackAction::parse(&action.encode()), Some(action));
        }
    }

    #[test]
    fn test_parse_cancel() {
        let session = SessionId::new();
        assert_eq!(
            CallbackAction::parse(&format!("task:cancel:{}", session)),
            Some(CallbackAction::CancelTask(session))
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(CallbackAction::parse("hitl:maybe:appr-1"), None);
        assert_eq!(CallbackAction::parse("hitl:opt10:appr-1"), None);
        assert_eq!(CallbackAction::parse("hitl:optx:appr-1"), None);
        assert_eq!(CallbackAction::parse("hitl:approve:"), None);
        assert_eq!(CallbackAction::parse("task:pause:sess-1"), None);
        assert_eq!(CallbackAction::parse("approve:once:x"), None);
        assert_eq!(CallbackAction::parse(""), None);
    }

    #[test]
    fn test_callback_data_fits_limit() {
        let longest = CallbackAction::Prompt {
            button: PromptButton::Clarify,
            approval_id: ApprovalId::new(),
        };
        assert!(longest.encode().len() <= MAX_CALLBACK_BYTES);
        let option = CallbackAction::Prompt {
            button: PromptButton::Option(9),
            approval_id: ApprovalId::new(),
        };
        assert!(option.encode().len() <= MAX_CALLBACK_BYTES);
        assert!(CallbackAction::CancelTask(SessionId::new()).encode().len() <= MAX_CALLBACK_BYTES);
    }

    #[test]
    fn test_question_keyboard_layout() {
        let id = ApprovalId::new();
        let options: Vec<String> = (0..12).map(|i| format!("choice {}", i)).collect();
        let keyboard = question_keyboard(&id, &options);

        let rows = &keyboard.inline_keyboard;
        assert_eq!(rows.len(), MAX_QUESTION_OPTIONS + 1);
        assert_eq!(rows[0][0].text, "choice 0");
        assert_eq!(rows[MAX_QUESTION_OPTIONS].len(), 2);
    }

    #[test]
    fn test_button_choice() {
        let tool = ActionRequest::new("Bash", "ls");
        assert_eq!(button_choice(PromptButton::Approve, &tool), Some(Choice::Approve));
        assert_eq!(button_choice(PromptButton::Clarify, &tool), None);
        assert_eq!(button_choice(PromptButton::Option(0), &tool), None);

        let question = ActionRequest::question("Which?", vec!["left".into(), "right".into()]);
        assert_eq!(
            button_choice(PromptButton::Option(1), &question),
            Some(Choice::Answer("right".into()))
        );
        assert_eq!(button_choice(PromptButton::Option(2), &question), None);
        assert_eq!(button_choice(PromptButton::Deny, &question), Some(Choice::Deny));
    }
}
