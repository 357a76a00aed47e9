//! Shared types used across all palaver crates.

pub mod process;
pub mod types;

pub use {
    process::{MessageProcessor, TextProcessor},
    types::{Event, OutboundMessage, User},
};
