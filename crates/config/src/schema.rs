//! Config schema types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PalaverConfig {
    pub scheduler: SchedulerConfig,
    pub events: EventsConfig,
    pub conversation: ConversationConfig,
}

/// Outbound thread scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Milliseconds between scheduler ticks. Default 1000.
    pub tick_interval_ms: u64,
    /// Milliseconds of idleness after which a thread expires. Default 30 minutes.
    pub max_thread_age_ms: u64,
    /// Minimum spacing between two deliveries to the same user.
    /// Falls back to `tick_interval_ms` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_delivery_interval_ms: Option<u64>,
    /// Start the tick loop as soon as the bot is built.
    pub autostart: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            max_thread_age_ms: 1_800_000,
            min_delivery_interval_ms: None,
            autostart: true,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_thread_age(&self) -> Duration {
        Duration::from_millis(self.max_thread_age_ms)
    }

    pub fn min_delivery_interval(&self) -> Duration {
        Duration::from_millis(
            self.min_delivery_interval_ms
                .unwrap_or(self.tick_interval_ms),
        )
    }
}

/// Lifecycle notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Buffered lifecycle events per subscriber before the slowest one lags.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Conversation engine limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Maximum nesting of `advance`/`respond` calls made from inside handlers.
    pub max_depth: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_interval_falls_back_to_tick() {
        let cfg = SchedulerConfig {
            tick_interval_ms: 250,
            ..Default::default()
        };
        assert_eq!(cfg.min_delivery_interval(), Duration::from_millis(250));

        let cfg = SchedulerConfig {
            min_delivery_interval_ms: Some(2_000),
            ..cfg
        };
        assert_eq!(cfg.min_delivery_interval(), Duration::from_secs(2));
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PalaverConfig::default();
        assert_eq!(cfg.scheduler.tick_interval(), Duration::from_secs(1));
        assert_eq!(cfg.scheduler.max_thread_age(), Duration::from_secs(1_800));
        assert!(cfg.scheduler.autostart);
        assert_eq!(cfg.events.capacity, 256);
        assert_eq!(cfg.conversation.max_depth, 64);
    }
}
