use {
    anyhow::Result, async_trait::async_trait, palaver_common::OutboundMessage, tokio::sync::mpsc,
};

/// Delivers one message to its user. Supplied by the transport adapter.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}

/// Forwards every delivered message into an unbounded channel.
///
/// Handy for adapters that own their own write loop, and for tests.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// A sender plus the receiving half of its channel.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl MessageSender for ChannelSender {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|e| anyhow::anyhow!("delivery channel closed for user {}", e.0.user.id))
    }
}
