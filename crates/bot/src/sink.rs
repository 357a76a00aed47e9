use std::sync::Weak;

use {
    palaver_conversation::{Conversation, ConversationSink},
    serde_json::Value,
    tracing::trace,
};

#[cfg(feature = "metrics")]
use palaver_metrics::{conversation as conversation_metrics, counter, gauge};

use crate::{
    bot::{Bot, BotInner},
    events::BotEvent,
};

/// Connects a conversation back to the bot that owns it.
///
/// Holds the bot weakly so a conversation left in some handler's closure
/// does not keep the whole bot alive.
pub(crate) struct BotSink {
    bot: Weak<BotInner>,
}

impl BotSink {
    pub(crate) fn new(bot: Weak<BotInner>) -> Self {
        Self { bot }
    }

    fn bot(&self) -> Option<Bot> {
        self.bot.upgrade().map(Bot::from_inner)
    }
}

impl ConversationSink for BotSink {
    fn say(&self, conversation: &Conversation, message: Value) {
        match self.bot() {
            Some(bot) => {
                bot.reply(conversation.source(), message);
            },
            None => trace!(conversation_id = %conversation.id(), "bot dropped, message discarded"),
        }
    }

    fn conversation_done(&self, conversation: &Conversation) {
        if let Some(bot) = self.bot() {
            bot.emit(BotEvent::ConversationDone {
                user_id: conversation.user_id().to_string(),
                conversation_id: conversation.id(),
            });
        }
    }

    fn conversation_ended(&self, conversation: &Conversation) {
        let Some(bot) = self.bot() else {
            return;
        };
        let user_id = conversation.user_id();
        let conversation_id = conversation.id();

        // Only drop the registry entry if it is still this conversation.
        bot.inner
            .conversations
            .remove_if(user_id, |_, entry| entry.id == conversation_id);
        bot.inner.scheduler.release(user_id);

        #[cfg(feature = "metrics")]
        {
            counter!(conversation_metrics::ENDED_TOTAL).increment(1);
            gauge!(conversation_metrics::ACTIVE).set(bot.inner.conversations.len() as f64);
        }

        bot.emit(BotEvent::ConversationEnded {
            user_id: user_id.to_string(),
            conversation_id,
        });
    }
}
