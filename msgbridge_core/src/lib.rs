pub mod connections;
pub mod core;
pub mod storage;

// re‑export ergonomic entry points
pub use connections::bridge::{BridgeConfig, BridgeProvider};
pub use core::message::{MessageRequest, OutgoingMessage};
pub use core::{ManagerConfig, SessionError, SessionManager, SessionSnapshot, SessionStatus};
pub use storage::{CredentialState, CredentialStore};
