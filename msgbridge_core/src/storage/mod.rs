pub mod credentials;
pub mod store;

pub use credentials::CredentialState;
pub use store::CredentialStore;
