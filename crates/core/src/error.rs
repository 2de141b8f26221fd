//! Unified error types for waystation.
//!
//! Strategy-level failures never show up here: the executor resolves them
//! into synthetic responses. What remains are storage failures, precache
//! failures, and queue delivery failures that the trigger caller must see.

use tokio_rusqlite::rusqlite;

/// Unified error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty queue tag).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid or unsupported URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Stored record could not be encoded or decoded.
    #[error("CACHE_ERROR: corrupt record: {0}")]
    Corrupt(String),

    /// Network fetch failed before a response was received.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Network fetch timed out.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// A manifest resource could not be fetched; nothing was written.
    #[error("PRECACHE_FAILED: {url}: {reason}")]
    PrecacheFailed { url: String, reason: String },

    /// A queued item failed to deliver; it and everything after it stay queued.
    #[error("DELIVERY_FAILED: tag {tag}, item {item_id}: {reason}")]
    DeliveryFailed { tag: String, item_id: u64, reason: String },

    /// No delivery handler is registered for the sync tag.
    #[error("UNKNOWN_TAG: {0}")]
    UnknownTag(String),

    /// The trigger is not valid in the current lifecycle state.
    #[error("INVALID_STATE: {0}")]
    InvalidState(String),
}

impl Error {
    /// Stable machine-readable code, the prefix of the display string.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Database(_) | Error::MigrationFailed(_) | Error::Corrupt(_) => "CACHE_ERROR",
            Error::HttpError(_) => "HTTP_ERROR",
            Error::FetchTimeout(_) => "FETCH_TIMEOUT",
            Error::PrecacheFailed { .. } => "PRECACHE_FAILED",
            Error::DeliveryFailed { .. } => "DELIVERY_FAILED",
            Error::UnknownTag(_) => "UNKNOWN_TAG",
            Error::InvalidState(_) => "INVALID_STATE",
        }
    }

    /// Whether the external scheduler should retry the trigger later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DeliveryFailed { .. } | Error::HttpError(_) | Error::FetchTimeout(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}
