//! A small onboarding dialogue that shows the dispatcher end to end.

use {
    palaver_bot::{Bot, BotContext, BotEvent},
    palaver_common::Event,
    palaver_conversation::{Answer, Conversation},
    palaver_middleware::Next,
    serde_json::{Value, json},
    tokio::sync::broadcast::{self, error::RecvError},
    tracing::{debug, info, warn},
};

use crate::console::MESSAGE_RECEIVED;

const HELP: &str = "Say anything to start. /bye ends the current conversation.";

/// Register the console commands on `bot`.
pub fn install(bot: &Bot) {
    let registered = bot
        .use_fn("inbound", |ctx: BotContext, next: Next<BotContext>| async move {
            debug!(user_id = %ctx.event.user.id, "inbound console line");
            next.run(ctx).await
        })
        .and_then(|bot| bot.use_fn(MESSAGE_RECEIVED, commands));
    if let Err(e) = registered {
        warn!(error = %e, "failed to register console middleware");
    }
}

/// `/help` and `/bye` are answered here and never reach a conversation.
async fn commands(ctx: BotContext, next: Next<BotContext>) -> anyhow::Result<()> {
    let command = ctx.event.text().map(|t| t.trim().to_string());
    match command.as_deref() {
        Some("/help") => {
            ctx.reply(HELP);
            Ok(())
        },
        Some("/bye") => {
            ctx.bot.end_conversation(ctx.event.user_id());
            ctx.reply("Bye!");
            Ok(())
        },
        _ => next.run(ctx).await,
    }
}

/// Start the onboarding dialogue for whoever speaks up outside a
/// conversation.
pub async fn listen(bot: Bot, mut events: broadcast::Receiver<BotEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "lifecycle listener lagged");
                continue;
            },
            Err(RecvError::Closed) => break,
        };

        match event {
            BotEvent::Dispatched { event_type, event } => {
                if event_type == MESSAGE_RECEIVED
                    && !bot.has_conversation(event.user_id())
                    && let Err(e) = onboard(&bot, event)
                {
                    warn!(error = %e, "could not start onboarding");
                }
            },
            BotEvent::ConversationStarted { user_id, .. } => {
                info!(user_id = %user_id, "onboarding started");
            },
            BotEvent::ConversationEnded { user_id, .. } => {
                info!(user_id = %user_id, "onboarding ended");
            },
            BotEvent::ThreadExpired { user_id, pending } => {
                info!(user_id = %user_id, pending, "user went quiet");
            },
            BotEvent::BotStarted | BotEvent::ConversationDone { .. } => {},
        }
    }
}

/// Name, then a drink (asked again until it is coffee or tea), then a
/// free-form note.
pub fn onboard(bot: &Bot, event: Event) -> palaver_bot::Result<()> {
    bot.chat(event, |conv| {
        conv.say("Hi! Two quick questions.");
        conv.ask("What's your name?", ask_drink);
        conv.ask("Anything else on your mind?", |answer, conv| {
            let name = text_of(conv.get("name"));
            let drink = text_of(conv.get("drink"));
            conv.save(json!({ "note": answer.message }));
            conv.say(format!("Thanks, {name}! Enjoy your {drink}."));
            Ok(conv.advance()?)
        });
        Ok(conv.advance()?)
    })?;
    Ok(())
}

fn ask_drink(answer: Answer, conv: &mut Conversation) -> anyhow::Result<()> {
    let name = answer.text().map(str::trim).unwrap_or("stranger").to_string();
    conv.save(json!({ "name": name }));
    conv.ask_with(move |conv| {
        conv.ask(
            format!("Nice to meet you, {name}. Coffee or tea?"),
            |answer, conv| {
                let choice = answer.text().map(|t| t.trim().to_ascii_lowercase());
                match choice.as_deref() {
                    Some(drink @ ("coffee" | "tea")) => {
                        conv.save(json!({ "drink": drink }));
                    },
                    _ => {
                        conv.repeat_with("Please answer coffee or tea.");
                    },
                }
                Ok(conv.advance()?)
            },
        );
        Ok(conv.advance()?)
    });
    Ok(conv.advance()?)
}

fn text_of(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or("friend")
        .to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        palaver_common::{OutboundMessage, User},
        palaver_config::PalaverConfig,
        palaver_threads::ChannelSender,
        std::{sync::Arc, time::Duration},
        tokio::sync::mpsc,
    };

    fn bot() -> (Bot, mpsc::UnboundedReceiver<OutboundMessage>) {
        let mut config = PalaverConfig::default();
        config.scheduler.autostart = false;
        config.scheduler.min_delivery_interval_ms = Some(0);
        let (sender, rx) = ChannelSender::pair();
        let bot = Bot::builder()
            .config(config)
            .sender(Arc::new(sender))
            .build()
            .unwrap();
        bot.extend(install);
        (bot, rx)
    }

    fn line(text: &str) -> Event {
        Event::new(User::new("console"), text).with_chat_enabled(true)
    }

    async fn said(bot: &Bot, rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<String> {
        while bot.tick().await.delivered > 0 {}
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message.message["text"].as_str().unwrap_or_default().to_string());
        }
        out
    }

    #[tokio::test]
    async fn onboarding_walks_through_every_question() {
        let (bot, mut rx) = bot();
        onboard(&bot, line("hi")).unwrap();
        assert_eq!(said(&bot, &mut rx).await, vec![
            "Hi! Two quick questions.",
            "What's your name?"
        ]);

        bot.dispatch(MESSAGE_RECEIVED, line("Ada")).await.unwrap();
        assert_eq!(said(&bot, &mut rx).await, vec![
            "Nice to meet you, Ada. Coffee or tea?"
        ]);

        bot.dispatch(MESSAGE_RECEIVED, line("milk")).await.unwrap();
        assert_eq!(said(&bot, &mut rx).await, vec![
            "Please answer coffee or tea."
        ]);

        bot.dispatch(MESSAGE_RECEIVED, line("Tea")).await.unwrap();
        assert_eq!(said(&bot, &mut rx).await, vec![
            "Anything else on your mind?"
        ]);

        let handle = bot.conversation("console").unwrap();
        bot.dispatch(MESSAGE_RECEIVED, line("nope")).await.unwrap();
        assert_eq!(said(&bot, &mut rx).await, vec![
            "Thanks, Ada! Enjoy your tea."
        ]);
        assert!(!bot.has_conversation("console"));
        assert_eq!(handle.lock().unwrap().get("note"), Some(&json!("nope")));
    }

    #[tokio::test]
    async fn help_is_answered_without_dispatching() {
        let (bot, mut rx) = bot();
        let mut events = bot.subscribe();

        bot.dispatch(MESSAGE_RECEIVED, line("/help")).await.unwrap();

        assert_eq!(said(&bot, &mut rx).await, vec![HELP]);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn bye_ends_the_conversation() {
        let (bot, mut rx) = bot();
        onboard(&bot, line("hi")).unwrap();
        said(&bot, &mut rx).await;

        bot.dispatch(MESSAGE_RECEIVED, line("/bye")).await.unwrap();
        assert!(!bot.has_conversation("console"));
        assert_eq!(said(&bot, &mut rx).await, vec!["Bye!"]);
    }

    #[tokio::test]
    async fn listener_starts_onboarding_for_new_users() {
        let (bot, mut rx) = bot();
        let listener = tokio::spawn(listen(bot.clone(), bot.subscribe()));

        bot.dispatch(MESSAGE_RECEIVED, line("hello")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !bot.has_conversation("console") {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(said(&bot, &mut rx).await[1], "What's your name?");
        listener.abort();
    }
}
