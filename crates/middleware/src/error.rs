/// Crate-wide result type for chain runs.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `run` was called on a chain that has no terminal handler.
    #[error("no terminal handler configured for middleware chain")]
    NoTerminal,

    /// A layer or the terminal returned an error.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}
