//! Where a middleware layer is attached.

use std::{fmt, sync::Arc};

use {
    async_trait::async_trait,
    palaver_middleware::{Middleware, Next},
};

use crate::bot::BotContext;

/// Target of [`Bot::use_middleware`](crate::Bot::use_middleware).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    Inbound,
    Outbound,
    Dispatch,
    /// Dispatch-chain layer that only sees events of this type.
    Event(String),
}

impl From<&str> for Stage {
    fn from(name: &str) -> Self {
        match name {
            "inbound" => Self::Inbound,
            "outbound" => Self::Outbound,
            "dispatch" => Self::Dispatch,
            other => Self::Event(other.to_string()),
        }
    }
}

impl From<String> for Stage {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
            Self::Dispatch => f.write_str("dispatch"),
            Self::Event(name) => f.write_str(name),
        }
    }
}

/// Runs `inner` only for events whose `event_type` matches; everything else
/// goes straight to the next layer.
pub struct EventTypeFilter {
    event_type: String,
    inner: Arc<dyn Middleware<BotContext>>,
}

impl EventTypeFilter {
    pub fn new(event_type: impl Into<String>, inner: Arc<dyn Middleware<BotContext>>) -> Self {
        Self {
            event_type: event_type.into(),
            inner,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

#[async_trait]
impl Middleware<BotContext> for EventTypeFilter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, ctx: BotContext, next: Next<BotContext>) -> anyhow::Result<()> {
        if ctx.event.event_type.as_deref() == Some(self.event_type.as_str()) {
            self.inner.handle(ctx, next).await
        } else {
            next.run(ctx).await
        }
    }
}
