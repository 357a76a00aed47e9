pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `advance`/`respond` were nested deeper than the configured limit,
    /// usually a handler answering its own question forever.
    #[error("conversation re-entered more than {depth} levels deep")]
    RecursionLimit { depth: usize },

    /// A question handler returned an error.
    #[error(transparent)]
    Handler(anyhow::Error),
}

impl Error {
    /// Unwrap errors that already came from this crate so a nested
    /// `RecursionLimit` keeps its identity on the way out.
    pub(crate) fn from_handler(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(inner) => inner,
            Err(err) => Self::Handler(err),
        }
    }
}
