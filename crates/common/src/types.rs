use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

// ── User ────────────────────────────────────────────────────────────────────

/// The person on the other side of a conversation.
///
/// Identity is the `id`; everything else an adapter knows about the user
/// (display name, locale, platform handles) rides along in `profile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            profile: Map::new(),
        }
    }
}

// ── Event ───────────────────────────────────────────────────────────────────

/// A unit of conversation flowing through the middleware chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub user: User,
    /// Opaque payload; the core never looks inside it.
    #[serde(default)]
    pub message: Value,
    /// Set by `Bot::dispatch` before the event enters the dispatch chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Only chat-enabled events are routed into an active conversation.
    #[serde(default)]
    pub chat_enabled: bool,
    /// Adapter-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    pub fn new(user: User, message: impl Into<Value>) -> Self {
        Self {
            user,
            message: message.into(),
            event_type: None,
            chat_enabled: false,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_chat_enabled(mut self, enabled: bool) -> Self {
        self.chat_enabled = enabled;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// The `text` field of the payload, when the payload carries one.
    pub fn text(&self) -> Option<&str> {
        match &self.message {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("text").and_then(Value::as_str),
            _ => None,
        }
    }
}

// ── OutboundMessage ─────────────────────────────────────────────────────────

/// A normalized message waiting in a user's thread for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub user: User,
    pub message: Value,
}

impl OutboundMessage {
    pub fn new(user: User, message: impl Into<Value>) -> Self {
        Self {
            user,
            message: message.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn user_profile_flattens() {
        let user: User = serde_json::from_value(json!({"id": "42", "name": "Ada"})).unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.profile.get("name"), Some(&json!("Ada")));

        let back = serde_json::to_value(&user).unwrap();
        assert_eq!(back, json!({"id": "42", "name": "Ada"}));
    }

    #[test]
    fn event_defaults_when_fields_missing() {
        let event: Event =
            serde_json::from_value(json!({"user": {"id": "1"}, "source": "console"})).unwrap();
        assert_eq!(event.message, Value::Null);
        assert!(event.event_type.is_none());
        assert!(!event.chat_enabled);
        assert_eq!(event.extra.get("source"), Some(&json!("console")));
    }

    #[test]
    fn event_text_reads_string_and_object_payloads() {
        let user = User::new("1");
        assert_eq!(Event::new(user.clone(), "hi").text(), Some("hi"));
        assert_eq!(
            Event::new(user.clone(), json!({"text": "yo"})).text(),
            Some("yo")
        );
        assert_eq!(Event::new(user, json!({"image": "x.png"})).text(), None);
    }
}
