//! stdin/stdout transport.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    async_trait::async_trait,
    palaver_bot::{Bot, BotContext},
    palaver_common::{Event, OutboundMessage, User},
    palaver_config::PalaverConfig,
    palaver_threads::MessageSender,
    serde_json::Value,
    tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    tracing::{debug, info, warn},
};

use crate::demo;

/// Event type given to every line typed on the console.
pub const MESSAGE_RECEIVED: &str = "message_received";

/// Writes each delivered message to stdout as `bot> text`.
pub struct StdoutSender;

#[async_trait]
impl MessageSender for StdoutSender {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(render(&message).as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

/// `{"text": ..}` payloads print their text; anything else prints as JSON.
pub fn render(message: &OutboundMessage) -> String {
    let text = match message.message.get("text").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => message.message.to_string(),
    };
    format!("bot> {text}\n")
}

/// Read lines from stdin as `user` until EOF, then wait for queued replies.
pub async fn run(config: PalaverConfig, user: String) -> Result<()> {
    let tick = config.scheduler.tick_interval();
    let bot = Bot::builder()
        .config(config)
        .sender(Arc::new(StdoutSender))
        .build()?;
    bot.extend(demo::install);
    let listener = tokio::spawn(demo::listen(bot.clone(), bot.subscribe()));
    bot.start()?;
    info!(user_id = %user, "console ready, type a message (Ctrl-D to quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = Event::new(User::new(user.clone()), line).with_chat_enabled(true);
        let result = bot
            .inbound(event, |ctx: BotContext| async move {
                ctx.bot.dispatch(MESSAGE_RECEIVED, ctx.event).await?;
                anyhow::Ok(())
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to handle console input");
        }
    }

    debug!("stdin closed, flushing replies");
    flush(&bot, tick).await;
    bot.stop();
    listener.abort();
    Ok(())
}

/// Wait until every thread has sent what it holds, or give up after a
/// bounded number of ticks.
async fn flush(bot: &Bot, tick: Duration) {
    const MAX_TICKS: u32 = 100;
    for _ in 0..MAX_TICKS {
        let pending: usize = bot.scheduler().snapshot().iter().map(|t| t.pending).sum();
        if pending == 0 {
            return;
        }
        tokio::time::sleep(tick).await;
    }
    warn!("giving up on undelivered replies");
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn render_prefers_text() {
        let message = OutboundMessage::new(User::new("u"), json!({"text": "hello"}));
        assert_eq!(render(&message), "bot> hello\n");

        let message = OutboundMessage::new(User::new("u"), json!({"image": "cat.png"}));
        assert_eq!(render(&message), "bot> {\"image\":\"cat.png\"}\n");
    }
}
