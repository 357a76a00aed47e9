//! Ordered async middleware chains.
//!
//! A chain is a list of [`Middleware`] layers followed by one terminal
//! handler. Each layer receives the context by value plus a [`Next`]
//! continuation; calling `next.run(ctx)` hands control to the following
//! layer, dropping `next` stops the chain there.

pub mod chain;
pub mod error;

pub use {
    chain::{ChainOutcome, Middleware, MiddlewareChain, Next, Terminal, from_fn, terminal_fn},
    error::{Error, Result},
};
