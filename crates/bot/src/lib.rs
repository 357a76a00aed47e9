//! The dispatcher.
//!
//! A [`Bot`] owns three middleware chains (inbound, outbound, dispatch), the
//! per-user conversation registry and the outbound [`ThreadScheduler`].
//! Transports feed events in through [`Bot::inbound`] and [`Bot::dispatch`];
//! whatever conversations and handlers say comes back out through the
//! scheduler's [`MessageSender`] one message per user per tick.
//!
//! [`ThreadScheduler`]: palaver_threads::ThreadScheduler
//! [`MessageSender`]: palaver_threads::MessageSender

pub mod bot;
pub mod error;
pub mod events;
pub mod stage;

mod sink;
mod ticker;

pub use {
    bot::{Bot, BotBuilder, BotContext, ConversationHandle},
    error::{Error, Result},
    events::BotEvent,
    stage::{EventTypeFilter, Stage},
};
