use serde_json::Value;

use crate::conversation::Conversation;

/// The host side of a conversation.
///
/// Callbacks run while the conversation is mutably borrowed by the engine, so
/// implementations must not try to lock or re-enter the same conversation.
pub trait ConversationSink: Send + Sync {
    /// Queue `message` for delivery to the conversation's user.
    fn say(&self, conversation: &Conversation, message: Value);

    /// Every queued question has been asked and answered.
    fn conversation_done(&self, _conversation: &Conversation) {}

    /// The conversation ended. Called at most once per conversation.
    fn conversation_ended(&self, conversation: &Conversation);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ConversationSink for NullSink {
    fn say(&self, _conversation: &Conversation, _message: Value) {}

    fn conversation_ended(&self, _conversation: &Conversation) {}
}
