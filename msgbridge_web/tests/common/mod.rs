#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use msgbridge_core::connections::{
    errors::ConnectionError, ConnectionProvider, ProviderConnection, ProviderEvent,
    ProviderSession,
};
use msgbridge_core::{CredentialState, CredentialStore, ManagerConfig, OutgoingMessage, SessionManager};
use msgbridge_web::{router, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Everything the provider saw, shared by all its connections.
#[derive(Default)]
pub struct Recorded {
    pub sent: Mutex<Vec<(String, String, OutgoingMessage)>>,
    pub terminated: Mutex<Vec<String>>,
    /// Connections stay quiet: no pairing code, never open.
    pub silent: AtomicBool,
    pub fail_sends: AtomicBool,
}

/// Opens registered accounts right away and shows a pairing code to the rest.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    pub recorded: Arc<Recorded>,
}

impl ScriptedProvider {
    pub fn sent(&self) -> Vec<(String, String, OutgoingMessage)> {
        self.recorded.sent.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.recorded.terminated.lock().unwrap().clone()
    }

    pub fn go_silent(&self) {
        self.recorded.silent.store(true, Ordering::SeqCst);
    }

    pub fn fail_sends(&self) {
        self.recorded.fail_sends.store(true, Ordering::SeqCst);
    }
}

struct ScriptedSession {
    account: String,
    recorded: Arc<Recorded>,
    // keeps the event stream open for as long as the manager holds the handle
    _events_tx: mpsc::Sender<ProviderEvent>,
}

#[async_trait]
impl ProviderSession for ScriptedSession {
    async fn send(
        &self,
        destination: &str,
        message: &OutgoingMessage,
    ) -> Result<(), ConnectionError> {
        if self.recorded.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::Rejected("scripted failure".into()));
        }
        self.recorded.sent.lock().unwrap().push((
            self.account.clone(),
            destination.to_string(),
            message.clone(),
        ));
        Ok(())
    }

    async fn terminate(&self) -> Result<(), ConnectionError> {
        self.recorded
            .terminated
            .lock()
            .unwrap()
            .push(self.account.clone());
        Ok(())
    }
}

#[async_trait]
impl ConnectionProvider for ScriptedProvider {
    async fn connect(
        &self,
        account: &str,
        credentials: CredentialState,
    ) -> Result<ProviderConnection, ConnectionError> {
        let (events_tx, events) = mpsc::channel(8);
        if !self.recorded.silent.load(Ordering::SeqCst) {
            let event = if credentials.is_registered() {
                ProviderEvent::Opened
            } else {
                ProviderEvent::Pairing(b"qr".to_vec())
            };
            let _ = events_tx.try_send(event);
        }
        Ok(ProviderConnection {
            session: Arc::new(ScriptedSession {
                account: account.to_string(),
                recorded: self.recorded.clone(),
                _events_tx: events_tx,
            }),
            events,
        })
    }
}

pub struct TestApp {
    _dir: TempDir,
    pub manager: SessionManager,
    pub provider: ScriptedProvider,
    router: Router,
}

impl TestApp {
    pub fn new(connect_on_send: bool) -> Self {
        Self::with_timeout(connect_on_send, Duration::from_millis(500))
    }

    pub fn with_timeout(connect_on_send: bool, ready_timeout: Duration) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let dir = tempfile::tempdir().expect("tempdir");
        let provider = ScriptedProvider::default();
        let manager = SessionManager::new(
            Arc::new(provider.clone()),
            CredentialStore::with_root(dir.path().join("sessions")),
            ManagerConfig {
                reconnect_delay: Duration::from_millis(50),
                ready_timeout,
            },
        );
        let router = router(AppState {
            manager: manager.clone(),
            connect_on_send,
        });
        Self {
            _dir: dir,
            manager,
            provider,
            router,
        }
    }

    /// Stores an identity so the account opens without pairing.
    pub async fn register(&self, account: &str) {
        let mut state = CredentialState::new();
        state.insert("creds", json!({ "me": { "id": account } }));
        self.manager.store().save(account, &state).await.unwrap();
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}
