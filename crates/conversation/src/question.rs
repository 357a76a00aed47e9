use std::{fmt, sync::Arc};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::conversation::Conversation;

/// Called with the user's answer to a prompt.
pub type ResponseHandler =
    Arc<dyn Fn(Answer, &mut Conversation) -> anyhow::Result<()> + Send + Sync>;

/// Called when a setup question comes up; usually asks sub-questions and
/// advances.
pub type SetupHandler = Arc<dyn Fn(&mut Conversation) -> anyhow::Result<()> + Send + Sync>;

/// A queued entry.
#[derive(Clone)]
pub enum Question {
    /// Sent to the user; the handler runs on the matching answer.
    Prompt {
        prompt: Value,
        handler: ResponseHandler,
        level: usize,
    },
    /// Never sent; runs as soon as `advance` selects it.
    Setup { handler: SetupHandler, level: usize },
}

impl Question {
    pub fn level(&self) -> usize {
        match self {
            Self::Prompt { level, .. } | Self::Setup { level, .. } => *level,
        }
    }

    pub fn prompt(&self) -> Option<&Value> {
        match self {
            Self::Prompt { prompt, .. } => Some(prompt),
            Self::Setup { .. } => None,
        }
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup { .. })
    }
}

impl fmt::Debug for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt { prompt, level, .. } => f
                .debug_struct("Prompt")
                .field("prompt", prompt)
                .field("level", level)
                .finish_non_exhaustive(),
            Self::Setup { level, .. } => f
                .debug_struct("Setup")
                .field("level", level)
                .finish_non_exhaustive(),
        }
    }
}

/// What the user said back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub message: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

impl Answer {
    pub fn new(message: impl Into<Value>) -> Self {
        Self {
            message: message.into(),
            event_type: None,
        }
    }

    /// Text of the answer, for string payloads and `{ "text": .. }` objects.
    pub fn text(&self) -> Option<&str> {
        match &self.message {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("text").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub question: Value,
    pub answer: Answer,
}
