use std::io;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use msgbridge_core::{BridgeConfig, CredentialStore, ManagerConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "msgbridge")]
#[command(about = "Keeps messaging-account sessions alive behind a small HTTP API")]
pub struct Cli {
    /// Interface to bind the HTTP server to
    #[arg(long, env = "MSGBRIDGE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 48501)]
    pub port: u16,

    /// Root of the per-account credential directories
    /// (defaults to the platform data dir)
    #[arg(long, env = "MSGBRIDGE_SESSIONS_DIR")]
    pub sessions_dir: Option<PathBuf>,

    /// WebSocket endpoint of the protocol sidecar
    #[arg(long, env = "MSGBRIDGE_BRIDGE_URL", default_value = "ws://127.0.0.1:8787")]
    pub bridge_url: String,

    /// Appended to destinations given without a domain
    #[arg(long, env = "MSGBRIDGE_RECIPIENT_SUFFIX", default_value = "@s.whatsapp.net")]
    pub recipient_suffix: String,

    #[arg(long, env = "MSGBRIDGE_RECONNECT_DELAY_MS", default_value_t = 5000)]
    pub reconnect_delay_ms: u64,

    /// How long a request waits for pairing data or an open session
    #[arg(long, env = "MSGBRIDGE_READY_TIMEOUT_MS", default_value_t = 10000)]
    pub ready_timeout_ms: u64,

    /// Connect and wait for the session when a message targets an
    /// account that is not connected yet, instead of answering 404
    #[arg(long, env = "MSGBRIDGE_CONNECT_ON_SEND")]
    pub connect_on_send: bool,
}

impl Cli {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            url: self.bridge_url.clone(),
            recipient_suffix: self.recipient_suffix.clone(),
            ..Default::default()
        }
    }

    pub fn store(&self) -> io::Result<CredentialStore> {
        match &self.sessions_dir {
            Some(dir) => Ok(CredentialStore::with_root(dir.clone())),
            None => CredentialStore::new(),
        }
    }
}
