pub mod bridge_connection;
mod protocol;

pub use bridge_connection::{BridgeConfig, BridgeProvider};
