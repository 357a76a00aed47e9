//! Metrics for palaver.
//!
//! Library crates record through the `metrics` facade behind their own
//! `metrics` feature; nothing is collected unless a recorder is installed.
//! With the `prometheus` feature, [`init_metrics`] installs a Prometheus
//! recorder whose [`MetricsHandle::render`] output can be scraped or dumped.
//!
//! ```rust,ignore
//! use palaver_metrics::{counter, threads};
//!
//! counter!(threads::MESSAGES_DELIVERED_TOTAL).increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
