#![allow(dead_code)]

pub mod fake_provider;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use msgbridge_core::{CredentialState, CredentialStore, ManagerConfig, SessionManager};
use serde_json::json;
use tempfile::TempDir;

use fake_provider::FakeProvider;

/// Logs will appear only when you run with `-- --nocapture`
/// or when the test fails.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn fast_config() -> ManagerConfig {
    ManagerConfig {
        reconnect_delay: Duration::from_millis(50),
        ready_timeout: Duration::from_millis(500),
    }
}

/// Manager over `provider` with a throw‑away sessions root.
/// Keep the returned `TempDir` alive for the duration of the test.
pub fn manager_with(provider: &FakeProvider, config: ManagerConfig) -> (TempDir, SessionManager) {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CredentialStore::with_root(dir.path().join("sessions"));
    let manager = SessionManager::new(Arc::new(provider.clone()), store, config);
    (dir, manager)
}

pub fn registered_credentials() -> CredentialState {
    let mut state = CredentialState::new();
    state.insert("creds", json!({ "me": { "id": "5511999999999" } }));
    state
}

/// Polls `condition` every 10ms; panics with `what` after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
