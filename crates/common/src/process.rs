//! Message body normalization applied before a reply is queued.

use serde_json::{Value, json};

/// Turns whatever a handler wants to say into the payload shape the
/// transport understands. Hosts replace the default to match their platform.
pub trait MessageProcessor: Send + Sync {
    fn process(&self, raw: Value) -> Value;
}

/// Default normalization: a bare string becomes `{ "text": .. }`,
/// structured payloads pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextProcessor;

impl MessageProcessor for TextProcessor {
    fn process(&self, raw: Value) -> Value {
        match raw {
            Value::String(text) => json!({ "text": text }),
            other => other,
        }
    }
}
