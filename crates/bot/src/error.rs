pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The user already has an active conversation.
    #[error("a conversation with user {user_id} is already active")]
    Conflict { user_id: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Middleware(#[from] palaver_middleware::Error),

    #[error(transparent)]
    Conversation(#[from] palaver_conversation::Error),

    #[error(transparent)]
    Config(#[from] palaver_config::Error),

    /// A `chat` callback failed with something other than a conversation error.
    #[error(transparent)]
    Handler(anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn configuration(message: impl std::fmt::Display) -> Self {
        Self::Configuration {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn conflict(user_id: impl Into<String>) -> Self {
        Self::Conflict {
            user_id: user_id.into(),
        }
    }

    pub(crate) fn from_handler(err: anyhow::Error) -> Self {
        match err.downcast::<palaver_conversation::Error>() {
            Ok(inner) => Self::Conversation(inner),
            Err(err) => Self::Handler(err),
        }
    }
}
