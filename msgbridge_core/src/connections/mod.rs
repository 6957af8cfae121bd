pub mod bridge;
pub mod connection;
pub mod errors;
pub mod reason;

pub use connection::{ConnectionProvider, ProviderConnection, ProviderEvent, ProviderSession};
pub use reason::DisconnectReason;
