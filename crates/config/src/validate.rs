//! Semantic checks on a parsed configuration.
//!
//! Parsing already rejects unknown formats and wrong types; this pass
//! catches values that parse fine but make the scheduler misbehave.

use std::fmt;

use crate::schema::PalaverConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "scheduler.tick_interval_ms"
    pub path: &'static str,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path,
            message: message.into(),
        });
    }
}

pub fn validate(config: &PalaverConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let sched = &config.scheduler;

    if sched.tick_interval_ms == 0 {
        result.push(
            Severity::Error,
            "scheduler.tick_interval_ms",
            "must be greater than zero",
        );
    }

    if sched.max_thread_age_ms == 0 {
        result.push(
            Severity::Error,
            "scheduler.max_thread_age_ms",
            "must be greater than zero",
        );
    } else if sched.max_thread_age_ms < sched.tick_interval_ms {
        result.push(
            Severity::Warning,
            "scheduler.max_thread_age_ms",
            format!(
                "{}ms is shorter than the tick interval ({}ms); threads may expire before their first delivery",
                sched.max_thread_age_ms, sched.tick_interval_ms
            ),
        );
    }

    if let Some(min) = sched.min_delivery_interval_ms
        && min < sched.tick_interval_ms
    {
        result.push(
            Severity::Warning,
            "scheduler.min_delivery_interval_ms",
            format!(
                "{min}ms is below the tick interval; delivery is still capped at one message per tick"
            ),
        );
    }

    if config.events.capacity == 0 {
        result.push(Severity::Error, "events.capacity", "must be greater than zero");
    }

    if config.conversation.max_depth == 0 {
        result.push(
            Severity::Error,
            "conversation.max_depth",
            "must be greater than zero",
        );
    }

    result
}
