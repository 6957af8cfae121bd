use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// A central error enum for provider-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The provider answered but refused the request.
    #[error("Rejected by provider: {0}")]
    Rejected(String),

    #[error("Connection closed")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        ConnectionError::Protocol(err.to_string())
    }
}
