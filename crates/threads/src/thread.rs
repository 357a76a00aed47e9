use std::{collections::VecDeque, time::Duration};

use {palaver_common::OutboundMessage, tokio::time::Instant};

/// One user's pending output.
#[derive(Debug, Clone)]
pub struct Thread {
    queue: VecDeque<OutboundMessage>,
    last_delivery: Instant,
    release_when_drained: bool,
}

impl Thread {
    /// An empty thread whose idle clock starts at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            queue: VecDeque::new(),
            last_delivery: now,
            release_when_drained: false,
        }
    }

    pub fn push(&mut self, message: OutboundMessage) {
        self.release_when_drained = false;
        self.queue.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn last_delivery(&self) -> Instant {
        self.last_delivery
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_delivery)
    }

    /// Strictly longer than `max_age` since the last delivery.
    pub fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        self.idle(now) > max_age
    }

    /// Pop the next message if strictly more than `interval` passed since
    /// the last delivery, restarting the idle clock. A zero interval turns
    /// throttling off.
    pub fn take_due(&mut self, now: Instant, interval: Duration) -> Option<OutboundMessage> {
        if !interval.is_zero() && self.idle(now) <= interval {
            return None;
        }
        let message = self.queue.pop_front()?;
        self.last_delivery = now;
        Some(message)
    }

    pub fn mark_released(&mut self) {
        self.release_when_drained = true;
    }

    pub fn is_released(&self) -> bool {
        self.release_when_drained
    }

    /// Released and nothing left to send.
    pub fn is_drained(&self) -> bool {
        self.release_when_drained && self.queue.is_empty()
    }
}
