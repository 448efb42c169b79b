use thiserror::Error;

/// Failures surfaced by the chat and ledger services.
///
/// Store and channel internals use `anyhow`; everything crossing a service
/// boundary is mapped into one of these.
#[derive(Debug, Error)]
pub enum TripError {
    /// No resolvable user identity. Fatal to session setup, never retried.
    #[error("authentication required: {0}")]
    Authentication(String),

    /// Rejected locally before any network or store call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A store read or write failed. Optimistic state has been rolled back.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The broadcast channel is unavailable.
    #[error("channel error: {0}")]
    Channel(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl TripError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TripError>;
