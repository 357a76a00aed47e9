//! Outbound message threads.
//!
//! Every user with pending output owns a [`Thread`]: a FIFO of normalized
//! messages plus the time of its last delivery. [`ThreadScheduler::tick`]
//! hands at most one message per user to the [`MessageSender`] each time the
//! user's delivery interval has elapsed, and drops threads that sat idle
//! longer than the configured maximum age.

pub mod scheduler;
pub mod sender;
pub mod thread;

pub use {
    scheduler::{ExpiredThread, SchedulerSettings, ThreadScheduler, ThreadSnapshot, TickReport},
    sender::{ChannelSender, MessageSender},
    thread::Thread,
};
