//! Per-user question/answer state machine.
//!
//! A [`Conversation`] holds a flat queue of [`Question`]s tagged with a
//! nesting level. Handlers ask follow-up questions at the level that was
//! current when they ran, and `advance` prefers questions at the current
//! level before falling back to the oldest pending one. That is enough to
//! resolve a nested sub-dialogue completely before its parent's siblings
//! come up, without keeping a stack of conversation objects.

pub mod conversation;
pub mod error;
pub mod question;
pub mod sink;

pub use {
    conversation::{Conversation, ConversationState, DEFAULT_MAX_DEPTH},
    error::{Error, Result},
    question::{Answer, Exchange, Question, ResponseHandler, SetupHandler},
    sink::{ConversationSink, NullSink},
};
