//! Structured errors for the waystation server.
//!
//! Engine errors keep their own codes; protocol problems use `INVALID_EVENT`.

use waystation_core::Error;

use crate::protocol::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The input line is not a valid event.
    #[error("INVALID_EVENT: {0}")]
    InvalidEvent(String),

    /// A reply could not be serialized.
    #[error("ENCODE_FAILED: {0}")]
    EncodeFailed(String),

    /// The task handling an event stopped before replying.
    #[error("ABORTED: {0}")]
    Aborted(String),

    #[error(transparent)]
    Engine(#[from] Error),
}

impl From<ServerError> for ErrorBody {
    fn from(err: ServerError) -> Self {
        let code = match &err {
            ServerError::InvalidEvent(_) => "INVALID_EVENT",
            ServerError::EncodeFailed(_) => "ENCODE_FAILED",
            ServerError::Aborted(_) => "ABORTED",
            ServerError::Engine(e) => e.code(),
        };
        ErrorBody { code: code.to_string(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::EncodeFailed(err.to_string())
    }
}
