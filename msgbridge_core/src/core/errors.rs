use std::time::Duration;

use thiserror::Error;

use crate::connections::errors::ConnectionError;

/// Errors surfaced by [`SessionManager`](super::session_manager::SessionManager) operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid account id {0:?}")]
    InvalidAccount(String),

    #[error("Session not found for '{0}'")]
    NotFound(String),

    /// Neither pairing data nor an open connection appeared in time.
    /// The connection attempt keeps running.
    #[error("Session for '{account}' not ready after {waited:?}")]
    NotReady { account: String, waited: Duration },

    #[error("Credential store error: {0}")]
    Store(#[from] std::io::Error),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
