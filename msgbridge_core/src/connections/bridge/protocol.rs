//! JSON frames exchanged with the protocol sidecar, one per WebSocket text message.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::message::OutgoingMessage;
use crate::storage::credentials::CredentialState;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum Outbound {
    /// First frame on every socket.
    Start {
        account: String,
        credentials: CredentialState,
    },
    Send {
        id: Uuid,
        to: String,
        message: OutgoingMessage,
    },
    Logout {
        id: Uuid,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum Inbound {
    /// Base64 PNG of the pairing code.
    Pairing {
        image: String,
    },
    Opened,
    Closed {
        #[serde(default, rename = "statusCode")]
        status_code: Option<u16>,
    },
    Credentials {
        entries: CredentialState,
    },
    Ack {
        id: Uuid,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}
