//! The background tick loop.

use std::{
    sync::{Arc, Weak, atomic::Ordering},
    time::Duration,
};

use {
    palaver_threads::TickReport,
    tokio::time::{Instant, MissedTickBehavior},
    tracing::{debug, info},
};

use crate::{
    bot::{Bot, BotInner},
    error::{Error, Result},
    events::BotEvent,
};

impl Bot {
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Spawn the tick loop on the current Tokio runtime and announce
    /// [`BotEvent::BotStarted`]. Calling it again while running does nothing.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::configuration(format!("starting the tick loop: {e}")))?;
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let period = self.inner.config.scheduler.tick_interval();
        let handle = runtime.spawn(tick_loop(Arc::downgrade(&self.inner), period));
        *self.inner.ticker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!(
            tick_interval_ms = self.inner.config.scheduler.tick_interval_ms,
            "bot started"
        );
        self.emit(BotEvent::BotStarted);
        Ok(())
    }

    /// Stop the tick loop. Queued messages stay queued.
    pub fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::AcqRel) {
            return;
        }
        let handle = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        info!("bot stopped");
    }

    /// Run one scheduler tick now.
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Instant::now()).await
    }

    /// Run one scheduler tick as of `now`. Every expired thread is announced
    /// once and its user's conversation is ended, or marked to end if a
    /// handler is running in it right now.
    pub async fn tick_at(&self, now: Instant) -> TickReport {
        let report = self.inner.scheduler.tick_at(now).await;
        for expired in &report.expired {
            self.emit(BotEvent::ThreadExpired {
                user_id: expired.user_id.clone(),
                pending: expired.pending,
            });
            self.end_conversation(&expired.user_id);
        }
        report
    }
}

async fn tick_loop(bot: Weak<BotInner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        let Some(inner) = bot.upgrade() else {
            debug!("bot dropped, tick loop exiting");
            break;
        };
        Bot::from_inner(inner).tick().await;
    }
}
