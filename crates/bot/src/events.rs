use {
    palaver_common::Event,
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// Lifecycle notifications broadcast by a [`Bot`](crate::Bot).
///
/// Receivers that fall more than `events.capacity` notifications behind
/// lose the oldest ones (see [`tokio::sync::broadcast`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BotEvent {
    /// The tick loop started.
    BotStarted,
    ConversationStarted {
        user_id: String,
        conversation_id: Uuid,
    },
    /// Every queued question was asked; `ConversationEnded` follows.
    ConversationDone {
        user_id: String,
        conversation_id: Uuid,
    },
    ConversationEnded {
        user_id: String,
        conversation_id: Uuid,
    },
    /// A thread sat idle past `max_thread_age` and was dropped with
    /// `pending` undelivered messages.
    ThreadExpired { user_id: String, pending: usize },
    /// A dispatched event that no conversation consumed.
    Dispatched { event_type: String, event: Event },
}

impl BotEvent {
    /// The user this notification concerns, if any.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::BotStarted => None,
            Self::ConversationStarted { user_id, .. }
            | Self::ConversationDone { user_id, .. }
            | Self::ConversationEnded { user_id, .. }
            | Self::ThreadExpired { user_id, .. } => Some(user_id),
            Self::Dispatched { event, .. } => Some(event.user_id()),
        }
    }
}
