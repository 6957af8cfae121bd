pub mod errors;
pub mod message;
pub mod session_manager;

pub use errors::SessionError;
pub use session_manager::{ManagerConfig, SessionManager, SessionSnapshot, SessionStatus};
