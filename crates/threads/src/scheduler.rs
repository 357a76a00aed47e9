//! Thread table and the delivery tick.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    dashmap::DashMap,
    futures::future::join_all,
    palaver_common::OutboundMessage,
    palaver_config::SchedulerConfig,
    serde::Serialize,
    tokio::time::Instant,
    tracing::{debug, info, trace, warn},
};

#[cfg(feature = "metrics")]
use palaver_metrics::{counter, gauge, histogram, threads as thread_metrics};

use crate::{sender::MessageSender, thread::Thread};

/// Timing knobs for delivery and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Minimum spacing between two deliveries to the same user.
    pub min_delivery_interval: Duration,
    /// Idle time after which a thread is dropped with whatever it still holds.
    pub max_thread_age: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            min_delivery_interval: config.min_delivery_interval(),
            max_thread_age: config.max_thread_age(),
        }
    }
}

/// A thread dropped for idleness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiredThread {
    pub user_id: String,
    /// Messages that were still queued and will never be sent.
    pub pending: usize,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub delivered: usize,
    pub failed: usize,
    pub expired: Vec<ExpiredThread>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.delivered == 0 && self.failed == 0 && self.expired.is_empty()
    }
}

/// Point-in-time view of one thread, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadSnapshot {
    pub user_id: String,
    pub pending: usize,
    pub idle_ms: u64,
    pub release_when_drained: bool,
}

/// Owns every user's [`Thread`] and decides what goes out on each tick.
pub struct ThreadScheduler {
    threads: DashMap<String, Thread>,
    sender: RwLock<Option<Arc<dyn MessageSender>>>,
    settings: SchedulerSettings,
}

impl ThreadScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            threads: DashMap::new(),
            sender: RwLock::new(None),
            settings,
        }
    }

    pub fn with_sender(settings: SchedulerSettings, sender: Arc<dyn MessageSender>) -> Self {
        let scheduler = Self::new(settings);
        scheduler.set_sender(sender);
        scheduler
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    /// Install (or replace) the delivery capability. Until one is set,
    /// messages accumulate in their threads.
    pub fn set_sender(&self, sender: Arc<dyn MessageSender>) {
        *self.sender.write().unwrap_or_else(|e| e.into_inner()) = Some(sender);
    }

    pub fn has_sender(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn current_sender(&self) -> Option<Arc<dyn MessageSender>> {
        self.sender
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Queueing ─────────────────────────────────────────────────────────

    /// Append `message` to its user's thread, creating the thread if needed.
    pub fn enqueue(&self, message: OutboundMessage) {
        self.enqueue_at(message, Instant::now());
    }

    /// [`enqueue`](Self::enqueue) with an explicit clock; a new thread's idle
    /// time starts at `now`.
    pub fn enqueue_at(&self, message: OutboundMessage, now: Instant) {
        let user_id = message.user.id.clone();
        let mut thread = self
            .threads
            .entry(user_id.clone())
            .or_insert_with(|| Thread::new(now));
        thread.push(message);
        trace!(user_id = %user_id, pending = thread.len(), "message enqueued");
        drop(thread);

        #[cfg(feature = "metrics")]
        {
            counter!(thread_metrics::MESSAGES_ENQUEUED_TOTAL).increment(1);
            gauge!(thread_metrics::ACTIVE).set(self.threads.len() as f64);
        }
    }

    /// Drop the user's thread and everything in it. Returns whether one existed.
    pub fn remove(&self, user_id: &str) -> bool {
        let removed = self.threads.remove(user_id);
        if let Some((_, thread)) = &removed {
            debug!(user_id, pending = thread.len(), "thread removed");
            #[cfg(feature = "metrics")]
            gauge!(thread_metrics::ACTIVE).set(self.threads.len() as f64);
        }
        removed.is_some()
    }

    /// Remove the user's thread once it has nothing left to deliver: right
    /// away when empty, otherwise after the tick that sends its last message.
    pub fn release(&self, user_id: &str) {
        if self
            .threads
            .remove_if(user_id, |_, thread| thread.is_empty())
            .is_some()
        {
            debug!(user_id, "thread released");
            #[cfg(feature = "metrics")]
            gauge!(thread_metrics::ACTIVE).set(self.threads.len() as f64);
            return;
        }
        if let Some(mut thread) = self.threads.get_mut(user_id) {
            thread.mark_released();
            debug!(user_id, pending = thread.len(), "thread released after drain");
        }
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn has_thread(&self, user_id: &str) -> bool {
        self.threads.contains_key(user_id)
    }

    pub fn queue_len(&self, user_id: &str) -> usize {
        self.threads.get(user_id).map_or(0, |t| t.len())
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// All threads, sorted by user id.
    pub fn snapshot(&self) -> Vec<ThreadSnapshot> {
        let now = Instant::now();
        let mut out: Vec<ThreadSnapshot> = self
            .threads
            .iter()
            .map(|entry| ThreadSnapshot {
                user_id: entry.key().clone(),
                pending: entry.len(),
                idle_ms: u64::try_from(entry.idle(now).as_millis()).unwrap_or(u64::MAX),
                release_when_drained: entry.is_released(),
            })
            .collect();
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        out
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Instant::now()).await
    }

    /// Expire idle threads, then deliver at most one due message per thread.
    ///
    /// Messages are taken out under the shard locks and sent after every
    /// lock is released. Failed sends are logged and not retried.
    pub async fn tick_at(&self, now: Instant) -> TickReport {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let settings = self.settings;
        let sender = self.current_sender();

        let mut expired_ids = Vec::new();
        let mut drained_ids = Vec::new();
        let mut outbox = Vec::new();

        for mut entry in self.threads.iter_mut() {
            if entry.is_expired(now, settings.max_thread_age) {
                expired_ids.push(entry.key().clone());
                continue;
            }
            if sender.is_some()
                && let Some(message) = entry.take_due(now, settings.min_delivery_interval)
            {
                outbox.push(message);
            }
            if entry.is_drained() {
                drained_ids.push(entry.key().clone());
            }
        }

        let mut report = TickReport::default();

        for user_id in expired_ids {
            let removed = self
                .threads
                .remove_if(&user_id, |_, t| t.is_expired(now, settings.max_thread_age));
            if let Some((user_id, thread)) = removed {
                let pending = thread.len();
                info!(user_id = %user_id, pending, "thread expired");
                report.expired.push(ExpiredThread { user_id, pending });
            }
        }

        for user_id in drained_ids {
            if self
                .threads
                .remove_if(&user_id, |_, t| t.is_drained())
                .is_some()
            {
                debug!(user_id = %user_id, "released thread drained");
            }
        }

        if let Some(sender) = sender
            && !outbox.is_empty()
        {
            let sends = outbox.into_iter().map(|message| {
                let sender = Arc::clone(&sender);
                async move {
                    let user_id = message.user.id.clone();
                    let result = sender.send(message).await;
                    (user_id, result)
                }
            });
            for (user_id, result) in join_all(sends).await {
                match result {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "message delivery failed");
                        report.failed += 1;
                    },
                }
            }
        }

        if !report.is_idle() {
            debug!(
                delivered = report.delivered,
                failed = report.failed,
                expired = report.expired.len(),
                threads = self.threads.len(),
                "tick finished"
            );
        }

        #[cfg(feature = "metrics")]
        {
            counter!(thread_metrics::MESSAGES_DELIVERED_TOTAL).increment(report.delivered as u64);
            counter!(thread_metrics::DELIVERY_ERRORS_TOTAL).increment(report.failed as u64);
            counter!(thread_metrics::EXPIRED_TOTAL).increment(report.expired.len() as u64);
            gauge!(thread_metrics::ACTIVE).set(self.threads.len() as f64);
            histogram!(thread_metrics::TICK_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }

        report
    }
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("threads", &self.threads.len())
            .field("has_sender", &self.has_sender())
            .field("settings", &self.settings)
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::sender::ChannelSender,
        async_trait::async_trait,
        palaver_common::User,
        serde_json::{Value, json},
        std::sync::atomic::{AtomicUsize, Ordering},
        tokio::sync::mpsc,
    };

    const T: Duration = Duration::from_millis(1_000);
    const EPS: Duration = Duration::from_millis(5);

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            min_delivery_interval: T,
            max_thread_age: Duration::from_secs(60),
        }
    }

    fn msg(user: &str, text: &str) -> OutboundMessage {
        OutboundMessage::new(User::new(user), json!({ "text": text }))
    }

    fn scheduler() -> (ThreadScheduler, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, rx) = ChannelSender::pair();
        (ThreadScheduler::with_sender(settings(), Arc::new(sender)), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m.message);
        }
        out
    }

    struct FailingSender {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl MessageSender for FailingSender {
        async fn send(&self, _message: OutboundMessage) -> anyhow::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("transport down")
        }
    }

    #[test]
    fn settings_follow_config() {
        let config = SchedulerConfig {
            tick_interval_ms: 250,
            max_thread_age_ms: 10_000,
            min_delivery_interval_ms: None,
            autostart: false,
        };
        let settings = SchedulerSettings::from(&config);
        assert_eq!(settings.min_delivery_interval, Duration::from_millis(250));
        assert_eq!(settings.max_thread_age, Duration::from_secs(10));

        let config = SchedulerConfig {
            min_delivery_interval_ms: Some(2_000),
            ..config
        };
        assert_eq!(
            SchedulerSettings::from(&config).min_delivery_interval,
            Duration::from_secs(2)
        );
    }

    #[test]
    fn enqueue_creates_one_thread_per_user() {
        let (scheduler, _rx) = scheduler();
        scheduler.enqueue(msg("a", "1"));
        scheduler.enqueue(msg("a", "2"));
        scheduler.enqueue(msg("b", "1"));

        assert_eq!(scheduler.thread_count(), 2);
        assert_eq!(scheduler.queue_len("a"), 2);
        assert_eq!(scheduler.queue_len("b"), 1);
        assert_eq!(scheduler.queue_len("nobody"), 0);

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].user_id, "a");
        assert_eq!(snapshot[0].pending, 2);
        assert!(!snapshot[0].release_when_drained);
    }

    #[tokio::test]
    async fn one_message_per_interval_per_user() {
        let (scheduler, mut rx) = scheduler();
        let t0 = Instant::now();
        scheduler.enqueue_at(msg("u", "first"), t0);
        scheduler.enqueue_at(msg("u", "second"), t0);

        let report = scheduler.tick_at(t0 + T / 2).await;
        assert!(report.is_idle());

        let report = scheduler.tick_at(t0 + T + EPS).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx), vec![json!({"text": "first"})]);

        // Interval restarts from the previous delivery.
        let report = scheduler.tick_at(t0 + T + EPS + T / 2).await;
        assert_eq!(report.delivered, 0);
        let report = scheduler.tick_at(t0 + T * 2 + EPS).await;
        assert_eq!(report.delivered, 0);

        let report = scheduler.tick_at(t0 + (T + EPS) * 2).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx), vec![json!({"text": "second"})]);
        assert_eq!(scheduler.queue_len("u"), 0);
        // Empty threads stay until released or expired.
        assert!(scheduler.has_thread("u"));
    }

    #[tokio::test]
    async fn users_are_delivered_independently() {
        let (scheduler, mut rx) = scheduler();
        let t0 = Instant::now();
        for user in ["a", "b", "c"] {
            scheduler.enqueue_at(msg(user, user), t0);
        }

        // Exactly one interval idle is not enough.
        let report = scheduler.tick_at(t0 + T).await;
        assert!(report.is_idle());
        assert!(drain(&mut rx).is_empty());

        let report = scheduler.tick_at(t0 + T + EPS).await;
        assert_eq!(report.delivered, 3);
        let mut texts: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|v| v["text"].as_str().unwrap().to_string())
            .collect();
        texts.sort();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn messages_accumulate_without_sender() {
        let scheduler = ThreadScheduler::new(settings());
        let t0 = Instant::now();
        scheduler.enqueue_at(msg("u", "held"), t0);

        let report = scheduler.tick_at(t0 + T * 3).await;
        assert!(report.is_idle());
        assert_eq!(scheduler.queue_len("u"), 1);

        let (sender, mut rx) = ChannelSender::pair();
        scheduler.set_sender(Arc::new(sender));
        let report = scheduler.tick_at(t0 + T * 4).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx), vec![json!({"text": "held"})]);
    }

    #[tokio::test]
    async fn idle_thread_expires_once_with_pending_messages() {
        let (scheduler, mut rx) = scheduler();
        let t0 = Instant::now();
        let max_age = settings().max_thread_age;
        scheduler.enqueue_at(msg("u", "stale"), t0);
        scheduler.enqueue_at(msg("u", "staler"), t0);

        let report = scheduler.tick_at(t0 + max_age).await;
        assert!(report.expired.is_empty());
        assert_eq!(report.delivered, 1);

        // Last delivery moved to t0 + max_age, so expiry counts from there.
        let later = t0 + max_age * 2 + EPS;
        let report = scheduler.tick_at(later).await;
        assert_eq!(report.expired, vec![ExpiredThread {
            user_id: "u".into(),
            pending: 1,
        }]);
        assert_eq!(report.delivered, 0);
        assert!(!scheduler.has_thread("u"));
        assert_eq!(drain(&mut rx).len(), 1);

        let report = scheduler.tick_at(later + T).await;
        assert!(report.expired.is_empty());
    }

    #[tokio::test]
    async fn release_removes_empty_thread_immediately() {
        let (scheduler, _rx) = scheduler();
        let t0 = Instant::now();
        scheduler.enqueue_at(msg("u", "x"), t0);
        scheduler.tick_at(t0 + T + EPS).await;

        scheduler.release("u");
        assert!(!scheduler.has_thread("u"));
        // Releasing an unknown user is a no-op.
        scheduler.release("ghost");
    }

    #[tokio::test]
    async fn released_thread_drains_before_removal() {
        let (scheduler, mut rx) = scheduler();
        let t0 = Instant::now();
        scheduler.enqueue_at(msg("u", "question"), t0);
        scheduler.enqueue_at(msg("u", "bye"), t0);
        scheduler.release("u");
        assert!(scheduler.has_thread("u"));
        assert!(scheduler.snapshot()[0].release_when_drained);

        scheduler.tick_at(t0 + T + EPS).await;
        assert!(scheduler.has_thread("u"));

        scheduler.tick_at(t0 + (T + EPS) * 2).await;
        assert!(!scheduler.has_thread("u"));
        assert_eq!(drain(&mut rx), vec![
            json!({"text": "question"}),
            json!({"text": "bye"})
        ]);
    }

    #[tokio::test]
    async fn enqueue_after_release_keeps_thread() {
        let (scheduler, _rx) = scheduler();
        let t0 = Instant::now();
        scheduler.enqueue_at(msg("u", "one"), t0);
        scheduler.release("u");
        scheduler.enqueue_at(msg("u", "two"), t0);

        scheduler.tick_at(t0 + T + EPS).await;
        scheduler.tick_at(t0 + (T + EPS) * 2).await;
        assert!(scheduler.has_thread("u"));
        assert_eq!(scheduler.queue_len("u"), 0);
    }

    #[tokio::test]
    async fn failed_delivery_is_dropped_not_retried() {
        let sender = Arc::new(FailingSender {
            attempts: AtomicUsize::new(0),
        });
        let scheduler = ThreadScheduler::with_sender(settings(), sender.clone());
        let t0 = Instant::now();
        scheduler.enqueue_at(msg("u", "doomed"), t0);

        let report = scheduler.tick_at(t0 + T + EPS).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(scheduler.queue_len("u"), 0);

        scheduler.tick_at(t0 + (T + EPS) * 2).await;
        assert_eq!(sender.attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_reports_whether_thread_existed() {
        let (scheduler, _rx) = scheduler();
        scheduler.enqueue(msg("u", "x"));
        assert!(scheduler.remove("u"));
        assert!(!scheduler.remove("u"));
        assert_eq!(scheduler.thread_count(), 0);
    }
}
