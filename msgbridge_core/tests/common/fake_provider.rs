//! A deterministic **in‑process stand‑in** for any type that implements
//! `msgbridge_core::connections::ConnectionProvider`.
//!
//! *  **From the test’s perspective**
//!    * Push lifecycle events into the latest connection of an account with
//!      `fake_provider.emit("u1", ProviderEvent::Opened).await`.
//!    * Inspect every message the manager dispatched via
//!      `fake_provider.session("u1").sent()`.
//!
//! *  The manager under test runs its real event pumps, reconnect timers and
//!    status channels; only the protocol sidecar is replaced.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use msgbridge_core::connections::{
    errors::ConnectionError, ConnectionProvider, ProviderConnection, ProviderEvent,
    ProviderSession,
};
use msgbridge_core::{CredentialState, OutgoingMessage};
use tokio::sync::mpsc;

/// One provider connection as seen by the test.
#[derive(Default)]
pub struct FakeSession {
    sent: Mutex<Vec<(String, OutgoingMessage)>>,
    pub terminated: AtomicBool,
    pub fail_sends: AtomicBool,
    pub fail_terminate: AtomicBool,
    /// `terminate` takes half a second, like a logout waiting on its ack.
    pub slow_terminate: AtomicBool,
}

impl FakeSession {
    /// Every `(destination, message)` the manager handed over, in order.
    pub fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderSession for FakeSession {
    async fn send(
        &self,
        destination: &str,
        message: &OutgoingMessage,
    ) -> Result<(), ConnectionError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ConnectionError::Rejected("fake send failure".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), message.clone()));
        Ok(())
    }

    async fn terminate(&self) -> Result<(), ConnectionError> {
        if self.slow_terminate.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        self.terminated.store(true, Ordering::SeqCst);
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(ConnectionError::Other("fake terminate failure".into()));
        }
        Ok(())
    }
}

struct FakeLink {
    events_tx: mpsc::Sender<ProviderEvent>,
    session: Arc<FakeSession>,
}

#[derive(Default)]
struct FakeState {
    connects: HashMap<String, usize>,
    links: HashMap<String, FakeLink>,
    credentials_seen: HashMap<String, CredentialState>,
    refused: HashSet<String>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    /// Emitted right away by connections without a stored identity.
    pairing_image: Option<Vec<u8>>,
    /// Emit `Opened` right away when the account already has an identity.
    open_registered: bool,
}

#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    /// A provider whose connections stay silent until the test emits events.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_pairing(self, image: &[u8]) -> Self {
        self.state.lock().unwrap().pairing_image = Some(image.to_vec());
        self
    }

    pub fn with_open_registered(self) -> Self {
        self.state.lock().unwrap().open_registered = true;
        self
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().default_delay = delay;
        self
    }

    pub fn slow_account(&self, account: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(account.to_string(), delay);
    }

    /// Make `connect` fail for `account` until [`accept`](Self::accept) is called.
    pub fn refuse(&self, account: &str) {
        self.state.lock().unwrap().refused.insert(account.to_string());
    }

    pub fn accept(&self, account: &str) {
        self.state.lock().unwrap().refused.remove(account);
    }

    pub fn connect_count(&self, account: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .connects
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    /// Whether `connect` has handed out a connection for `account`.
    pub fn is_linked(&self, account: &str) -> bool {
        self.state.lock().unwrap().links.contains_key(account)
    }

    /// Credentials passed to the most recent `connect` of `account`.
    pub fn credentials_seen(&self, account: &str) -> Option<CredentialState> {
        self.state
            .lock()
            .unwrap()
            .credentials_seen
            .get(account)
            .cloned()
    }

    /// The latest connection handed out for `account`.
    pub fn session(&self, account: &str) -> Arc<FakeSession> {
        self.state
            .lock()
            .unwrap()
            .links
            .get(account)
            .map(|l| l.session.clone())
            .expect("no connection for account")
    }

    /// Push an event into the latest connection of `account`.
    pub async fn emit(&self, account: &str, event: ProviderEvent) {
        let events_tx = self
            .state
            .lock()
            .unwrap()
            .links
            .get(account)
            .map(|l| l.events_tx.clone())
            .expect("no connection for account");
        // the manager may already have dropped a stale stream
        let _ = events_tx.send(event).await;
    }

    /// Drop the event sender, ending the stream without a close event.
    pub fn drop_link(&self, account: &str) {
        self.state.lock().unwrap().links.remove(account);
    }
}

#[async_trait]
impl ConnectionProvider for FakeProvider {
    async fn connect(
        &self,
        account: &str,
        credentials: CredentialState,
    ) -> Result<ProviderConnection, ConnectionError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            *state.connects.entry(account.to_string()).or_default() += 1;
            state
                .credentials_seen
                .insert(account.to_string(), credentials.clone());
            if state.refused.contains(account) {
                return Err(ConnectionError::Other("fake connect refused".into()));
            }
            state
                .delays
                .get(account)
                .copied()
                .unwrap_or(state.default_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (events_tx, events_rx) = mpsc::channel(32);
        let session = Arc::new(FakeSession::default());

        let mut state = self.state.lock().unwrap();
        if credentials.is_registered() && state.open_registered {
            let _ = events_tx.try_send(ProviderEvent::Opened);
        } else if let Some(image) = &state.pairing_image {
            let _ = events_tx.try_send(ProviderEvent::Pairing(image.clone()));
        }
        state.links.insert(
            account.to_string(),
            FakeLink {
                events_tx,
                session: session.clone(),
            },
        );

        Ok(ProviderConnection {
            session,
            events: events_rx,
        })
    }
}
