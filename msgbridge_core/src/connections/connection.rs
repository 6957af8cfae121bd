use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::ConnectionError;
use super::reason::DisconnectReason;
use crate::core::message::OutgoingMessage;
use crate::storage::credentials::CredentialState;

/// Lifecycle notifications emitted by a provider connection.
///
/// A connection emits zero or more `Pairing` events, then either `Opened` or
/// `Closed`. After `Opened` it may still emit `Closed` when the link drops.
/// `CredentialsUpdated` can arrive at any point and must be persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Raw pairing image (PNG) for a fresh authentication.
    Pairing(Vec<u8>),
    CredentialsUpdated(CredentialState),
    Opened,
    Closed(DisconnectReason),
}

/// A live connection handle owned by the session manager.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Deliver `message` to `destination` (a bare address, e.g. a phone number).
    async fn send(&self, destination: &str, message: &OutgoingMessage)
        -> Result<(), ConnectionError>;

    /// Log the account out on the remote side.
    async fn terminate(&self) -> Result<(), ConnectionError>;
}

/// What a provider hands back from [`ConnectionProvider::connect`].
pub struct ProviderConnection {
    pub session: Arc<dyn ProviderSession>,
    pub events: mpsc::Receiver<ProviderEvent>,
}

/// A trait representing the component that speaks the messaging protocol.
///
/// `connect` only begins establishing the connection; progress is reported
/// through the returned event stream.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(
        &self,
        account: &str,
        credentials: CredentialState,
    ) -> Result<ProviderConnection, ConnectionError>;
}
