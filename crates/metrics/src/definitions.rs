//! Metric name and label definitions.
//!
//! Every metric palaver records is named here so dashboards have one place
//! to look.

/// Event dispatch metrics
pub mod dispatch {
    /// Events that entered the dispatch chain
    pub const EVENTS_TOTAL: &str = "palaver_dispatch_events_total";
    /// Events routed into an active conversation
    pub const ROUTED_TO_CONVERSATION_TOTAL: &str = "palaver_dispatch_routed_to_conversation_total";
    /// Events broadcast as generic lifecycle events
    pub const BROADCAST_TOTAL: &str = "palaver_dispatch_broadcast_total";
    /// Inbound/outbound events dropped because the bot was not started
    pub const DROPPED_NOT_STARTED_TOTAL: &str = "palaver_dispatch_dropped_not_started_total";
    /// Middleware chain failures
    pub const CHAIN_ERRORS_TOTAL: &str = "palaver_dispatch_chain_errors_total";
}

/// Conversation engine metrics
pub mod conversation {
    /// Conversations started
    pub const STARTED_TOTAL: &str = "palaver_conversations_started_total";
    /// Conversations ended
    pub const ENDED_TOTAL: &str = "palaver_conversations_ended_total";
    /// Conversations currently active
    pub const ACTIVE: &str = "palaver_conversations_active";
    /// Starts rejected because the user already had an active conversation
    pub const CONFLICTS_TOTAL: &str = "palaver_conversations_conflicts_total";
}

/// Outbound thread metrics
pub mod threads {
    /// Messages placed in a thread queue
    pub const MESSAGES_ENQUEUED_TOTAL: &str = "palaver_thread_messages_enqueued_total";
    /// Messages handed to the delivery capability successfully
    pub const MESSAGES_DELIVERED_TOTAL: &str = "palaver_thread_messages_delivered_total";
    /// Delivery attempts that returned an error
    pub const DELIVERY_ERRORS_TOTAL: &str = "palaver_thread_delivery_errors_total";
    /// Threads removed for idleness
    pub const EXPIRED_TOTAL: &str = "palaver_threads_expired_total";
    /// Threads currently tracked
    pub const ACTIVE: &str = "palaver_threads_active";
    /// Wall time of one scheduler tick including delivery
    pub const TICK_DURATION_SECONDS: &str = "palaver_thread_tick_duration_seconds";
}

/// Common label keys
pub mod labels {
    pub const EVENT_TYPE: &str = "event_type";
    pub const STAGE: &str = "stage";
}

/// Standard histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Tick duration buckets (in seconds)
    /// Covers 100µs to 10s; a tick awaits every delivery it starts.
    pub static TICK_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]
    });
}
