//! Error types for derivq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Content could not be resolved to bytes. Terminal per request.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The generator collaborator failed. Terminal per request.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Ledger or artifact store unavailable.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A notification payload that failed to parse. Logged and dropped;
    /// the polling fallback guarantees eventual progress.
    #[error("malformed notification: {0}")]
    MalformedNotification(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
