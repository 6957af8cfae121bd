use crate::connections::{
    ConnectionProvider, DisconnectReason, ProviderConnection, ProviderEvent, ProviderSession,
};
use crate::core::errors::SessionError;
use crate::core::message::OutgoingMessage;
use crate::storage::store::is_valid_name;
use crate::storage::CredentialStore;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::future::{BoxFuture, FutureExt};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// 20 checks at 500ms each.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_millis(20 * 500);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Delay before reconnecting after a non-logout disconnect.
    pub reconnect_delay: Duration,
    /// Upper bound for waiting on pairing data or an open connection.
    pub ready_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Externally visible state of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Nothing live, nothing pending.
    Absent,
    /// A connection attempt is running or a reconnect is scheduled.
    Connecting,
    /// Waiting for the pairing code (a `data:` URI) to be scanned.
    PairingPending(String),
    Connected,
}

impl SessionStatus {
    /// Connected, or has a pairing code to show.
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionStatus::Connected | SessionStatus::PairingPending(_))
    }
}

/// Presence of each per-account entry, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub pairing: bool,
    pub in_flight: bool,
    pub reconnect_scheduled: bool,
}

struct SessionRecord {
    generation: u64,
    handle: Arc<dyn ProviderSession>,
}

/// Marks a running connect attempt. `handle` is filled once the provider
/// accepted the connect call so an explicit close can still log it out.
struct InFlight {
    generation: u64,
    handle: Option<Arc<dyn ProviderSession>>,
}

struct ReconnectTimer {
    ticket: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct AccountState {
    session: Option<SessionRecord>,
    pairing: Option<String>,
    in_flight: Option<InFlight>,
    reconnect: Option<ReconnectTimer>,
    generation: u64,
    /// Attempt that was closed before its connect returned; its handle is
    /// logged out as soon as it arrives.
    pending_logout: Option<u64>,
}

impl AccountState {
    fn status(&self) -> SessionStatus {
        if self.session.is_some() {
            SessionStatus::Connected
        } else if let Some(pairing) = &self.pairing {
            SessionStatus::PairingPending(pairing.clone())
        } else if self.in_flight.is_some() || self.reconnect.is_some() {
            SessionStatus::Connecting
        } else {
            SessionStatus::Absent
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connected: self.session.is_some(),
            pairing: self.pairing.is_some(),
            in_flight: self.in_flight.is_some(),
            reconnect_scheduled: self.reconnect.is_some(),
        }
    }

    /// Events are only applied while their attempt still owns the account.
    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation)
            || self
                .session
                .as_ref()
                .is_some_and(|s| s.generation == generation)
    }

    /// Drops the session record, pairing entry and in-flight marker.
    /// Returns whichever provider handle was live.
    fn clear(&mut self) -> Option<Arc<dyn ProviderSession>> {
        self.pairing = None;
        let in_flight = self.in_flight.take().and_then(|f| f.handle);
        let session = self.session.take().map(|s| s.handle);
        session.or(in_flight)
    }

    fn has_live_state(&self) -> bool {
        self.session.is_some()
            || self.pairing.is_some()
            || self.in_flight.is_some()
            || self.reconnect.is_some()
    }

    fn cancel_reconnect(&mut self) -> bool {
        match self.reconnect.take() {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }
}

/// One per account. The state lock serializes every mutation for the
/// account; `status_tx` lets readers see the latest status without it.
struct AccountSlot {
    state: Mutex<AccountState>,
    status_tx: watch::Sender<SessionStatus>,
}

impl AccountSlot {
    fn new() -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Absent);
        Self {
            state: Mutex::new(AccountState::default()),
            status_tx,
        }
    }

    fn publish(&self, state: &AccountState) {
        self.status_tx.send_replace(state.status());
    }
}

struct Inner {
    provider: Arc<dyn ConnectionProvider>,
    store: CredentialStore,
    config: ManagerConfig,
    accounts: Mutex<HashMap<String, Arc<AccountSlot>>>,
    tickets: AtomicU64,
}

/// Owns every account's connection state.
///
/// Cloning is cheap: clones share the same table through an `Arc`, the same
/// way request handlers and background tasks share it.
///
/// Per account it guarantees at most one live provider connection and at
/// most one running connect attempt. Disconnects other than a logout are
/// retried after [`ManagerConfig::reconnect_delay`]; a logout or an explicit
/// [`close`](Self::close) deletes the stored credentials.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        store: CredentialStore,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                config,
                accounts: Mutex::new(HashMap::new()),
                tickets: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    fn validate(account: &str) -> Result<(), SessionError> {
        if is_valid_name(account) {
            Ok(())
        } else {
            Err(SessionError::InvalidAccount(account.to_string()))
        }
    }

    /// Get or create the slot of `account`. Slots are never removed.
    async fn slot(&self, account: &str) -> Result<Arc<AccountSlot>, SessionError> {
        Self::validate(account)?;
        let mut map = self.inner.accounts.lock().await;
        Ok(map
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(AccountSlot::new()))
            .clone())
    }

    async fn existing_slot(&self, account: &str) -> Option<Arc<AccountSlot>> {
        let map = self.inner.accounts.lock().await;
        map.get(account).cloned()
    }

    /// Current status of `account`; unknown accounts are `Absent`.
    pub async fn status(&self, account: &str) -> SessionStatus {
        match self.existing_slot(account).await {
            Some(slot) => slot.status_tx.borrow().clone(),
            None => SessionStatus::Absent,
        }
    }

    pub async fn snapshot(&self, account: &str) -> SessionSnapshot {
        match self.existing_slot(account).await {
            Some(slot) => slot.state.lock().await.snapshot(),
            None => SessionSnapshot::default(),
        }
    }

    /// Starts a connect attempt unless the account is already connected or
    /// connecting, in which case this is a no-op.
    ///
    /// A scheduled reconnect is superseded by the new attempt. The account
    /// lock is not held while the provider connects.
    pub async fn ensure_connected(&self, account: &str) -> Result<SessionStatus, SessionError> {
        let slot = self.slot(account).await?;
        let generation = {
            let mut state = slot.state.lock().await;
            match Self::begin_attempt(account, &slot, &mut state) {
                Some(generation) => generation,
                None => return Ok(state.status()),
            }
        };
        self.finish_attempt(account, &slot, generation, false).await?;
        let status = slot.status_tx.borrow().clone();
        Ok(status)
    }

    /// Sets the in-flight marker. `None` if the account is already connected
    /// or connecting.
    fn begin_attempt(account: &str, slot: &AccountSlot, state: &mut AccountState) -> Option<u64> {
        if state.session.is_some() || state.in_flight.is_some() {
            debug!("'{}' is already connected or connecting", account);
            return None;
        }
        state.cancel_reconnect();
        state.generation += 1;
        let generation = state.generation;
        state.in_flight = Some(InFlight {
            generation,
            handle: None,
        });
        slot.publish(state);
        info!("Connecting session for '{}'", account);
        Some(generation)
    }

    /// Loads credentials and connects without the account lock, then installs
    /// the handle if the attempt still owns the account. With `retry`, a
    /// failed connect that still owns the account schedules another one.
    async fn finish_attempt(
        &self,
        account: &str,
        slot: &Arc<AccountSlot>,
        generation: u64,
        retry: bool,
    ) -> Result<(), SessionError> {
        let connection = self.open_connection(account).await;

        let mut state = slot.state.lock().await;
        let still_current = state
            .in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation);

        let ProviderConnection { session, events } = match connection {
            Ok(connection) => connection,
            Err(e) => {
                error!("Connect for '{}' failed: {}", account, e);
                if still_current {
                    // the marker must not outlive a failed attempt
                    state.in_flight = None;
                    if retry {
                        self.schedule_reconnect(account, slot, &mut state);
                    }
                    slot.publish(&state);
                }
                return Err(e);
            }
        };

        if !still_current {
            let logout = state.pending_logout == Some(generation);
            if logout {
                state.pending_logout = None;
            }
            drop(state);
            debug!("Attempt {} for '{}' was superseded while connecting", generation, account);
            if logout {
                if let Err(e) = session.terminate().await {
                    warn!("Logout for '{}' failed, continuing: {}", account, e);
                }
            }
            return Ok(());
        }

        if let Some(in_flight) = state.in_flight.as_mut() {
            in_flight.handle = Some(session);
        }
        tokio::spawn(
            self.clone()
                .pump_events(account.to_string(), slot.clone(), generation, events),
        );
        Ok(())
    }

    async fn open_connection(&self, account: &str) -> Result<ProviderConnection, SessionError> {
        let credentials = self.inner.store.load(account).await?;
        if !credentials.is_registered() {
            info!("No stored identity for '{}', expecting a pairing code", account);
        }
        Ok(self.inner.provider.connect(account, credentials).await?)
    }

    /// Applies the provider events of one attempt. Exits after a close, or as
    /// soon as the attempt no longer owns the account.
    async fn pump_events(
        self,
        account: String,
        slot: Arc<AccountSlot>,
        generation: u64,
        mut events: mpsc::Receiver<ProviderEvent>,
    ) {
        debug!("Event pump started for '{}' (attempt {})", account, generation);
        loop {
            let event = events.recv().await;
            let mut state = slot.state.lock().await;
            if !state.is_current(generation) {
                debug!("Attempt {} for '{}' is stale, dropping its events", generation, account);
                break;
            }

            match event {
                Some(ProviderEvent::Pairing(image)) => {
                    if state.session.is_none() {
                        debug!("Pairing code received for '{}'", account);
                        state.pairing = Some(render_pairing(&image));
                    }
                }
                Some(ProviderEvent::CredentialsUpdated(credentials)) => {
                    if let Err(e) = self.inner.store.save(&account, &credentials).await {
                        error!("Saving credentials for '{}' failed: {}", account, e);
                    }
                }
                Some(ProviderEvent::Opened) => {
                    let handle = state.in_flight.as_mut().and_then(|f| f.handle.take());
                    match handle {
                        Some(handle) => {
                            state.in_flight = None;
                            state.pairing = None;
                            state.session = Some(SessionRecord { generation, handle });
                            info!("Session connected for '{}'", account);
                        }
                        None => debug!("Duplicate open event for '{}'", account),
                    }
                }
                Some(ProviderEvent::Closed(reason)) => {
                    self.handle_closed(&account, &slot, &mut state, reason).await;
                    slot.publish(&state);
                    break;
                }
                None => {
                    debug!("Event stream for '{}' ended without a close", account);
                    self.handle_closed(&account, &slot, &mut state, DisconnectReason::Unknown(None))
                        .await;
                    slot.publish(&state);
                    break;
                }
            }
            slot.publish(&state);
        }
        debug!("Event pump ended for '{}' (attempt {})", account, generation);
    }

    async fn handle_closed(
        &self,
        account: &str,
        slot: &Arc<AccountSlot>,
        state: &mut AccountState,
        reason: DisconnectReason,
    ) {
        state.clear();
        if reason.is_logged_out() {
            info!("'{}' logged out ({}), deleting credentials", account, reason);
            if let Err(e) = self.inner.store.delete(account).await {
                error!("Deleting credentials for '{}' failed: {}", account, e);
            }
        } else {
            warn!(
                "Connection for '{}' closed: {}, reconnecting in {:?}",
                account, reason, self.inner.config.reconnect_delay
            );
            self.schedule_reconnect(account, slot, state);
        }
    }

    fn schedule_reconnect(&self, account: &str, slot: &Arc<AccountSlot>, state: &mut AccountState) {
        state.cancel_reconnect();
        let ticket = self.inner.tickets.fetch_add(1, Ordering::Relaxed) + 1;
        let task = tokio::spawn(self.clone().reconnect_after(
            account.to_string(),
            slot.clone(),
            ticket,
        ));
        state.reconnect = Some(ReconnectTimer { ticket, task });
    }

    // Boxed: this future and `pump_events` spawn each other.
    fn reconnect_after(
        self,
        account: String,
        slot: Arc<AccountSlot>,
        ticket: u64,
    ) -> BoxFuture<'static, ()> {
        async move {
            tokio::time::sleep(self.inner.config.reconnect_delay).await;
            let mut state = slot.state.lock().await;
            if !state.reconnect.as_ref().is_some_and(|t| t.ticket == ticket) {
                debug!("Reconnect timer {} for '{}' was superseded", ticket, account);
                return;
            }
            state.reconnect = None;
            info!("Reconnecting '{}'", account);
            let Some(generation) = Self::begin_attempt(&account, &slot, &mut state) else {
                slot.publish(&state);
                return;
            };
            drop(state);
            if let Err(e) = self.finish_attempt(&account, &slot, generation, true).await {
                warn!("Reconnect for '{}' failed: {}", account, e);
            }
        }
        .boxed()
    }

    async fn wait_for(
        &self,
        account: &str,
        ready: impl Fn(&SessionStatus) -> bool,
    ) -> Result<SessionStatus, SessionError> {
        let slot = self.slot(account).await?;
        let mut status_rx = slot.status_tx.subscribe();
        let waited = self.inner.config.ready_timeout;
        // bound so the borrowed status drops before `status_rx`
        let result = match tokio::time::timeout(waited, status_rx.wait_for(|s| ready(s))).await {
            Ok(Ok(status)) => Ok((*status).clone()),
            Ok(Err(_)) | Err(_) => Err(SessionError::NotReady {
                account: account.to_string(),
                waited,
            }),
        };
        result
    }

    /// Connects if needed, then waits until the account is connected or has
    /// a pairing code. A timeout leaves the attempt running.
    pub async fn connect_and_wait(&self, account: &str) -> Result<SessionStatus, SessionError> {
        let status = self.ensure_connected(account).await?;
        if status.is_ready() {
            return Ok(status);
        }
        self.wait_for(account, SessionStatus::is_ready).await
    }

    /// Dispatches through the live session. Fails with `NotFound` if the
    /// account is not connected.
    ///
    /// A provider failure invalidates the cached session so the next
    /// operation reconnects instead of reusing a possibly dead handle. The
    /// send itself is not retried.
    pub async fn send(
        &self,
        account: &str,
        destination: &str,
        message: &OutgoingMessage,
    ) -> Result<(), SessionError> {
        Self::validate(account)?;
        let not_found = || SessionError::NotFound(account.to_string());
        let slot = self.existing_slot(account).await.ok_or_else(not_found)?;
        let (generation, handle) = {
            let state = slot.state.lock().await;
            let record = state.session.as_ref().ok_or_else(not_found)?;
            (record.generation, record.handle.clone())
        };

        match handle.send(destination, message).await {
            Ok(()) => {
                debug!("Message from '{}' to '{}' accepted", account, destination);
                Ok(())
            }
            Err(e) => {
                error!("Send from '{}' to '{}' failed: {}", account, destination, e);
                let mut state = slot.state.lock().await;
                if state.session.as_ref().is_some_and(|s| s.generation == generation) {
                    warn!("Dropping suspect session for '{}'", account);
                    state.session = None;
                    slot.publish(&state);
                }
                Err(e.into())
            }
        }
    }

    /// Like [`send`](Self::send), but first connects and waits (bounded) for
    /// the session to open when it is not connected yet.
    pub async fn send_when_ready(
        &self,
        account: &str,
        destination: &str,
        message: &OutgoingMessage,
    ) -> Result<(), SessionError> {
        if self.status(account).await != SessionStatus::Connected {
            self.ensure_connected(account).await?;
            self.wait_for(account, |s| *s == SessionStatus::Connected)
                .await?;
        }
        self.send(account, destination, message).await
    }

    /// Logs the account out and forgets it, whatever state it is in.
    ///
    /// Termination errors are logged and ignored. Credentials are deleted and
    /// any scheduled reconnect is cancelled. Returns whether the account had
    /// live or pending state.
    pub async fn close(&self, account: &str) -> Result<bool, SessionError> {
        Self::validate(account)?;
        let Some(slot) = self.existing_slot(account).await else {
            let removed = self.inner.store.delete(account).await?;
            info!("Closed unknown account '{}' (credentials removed: {})", account, removed);
            return Ok(false);
        };

        let (had_state, handle) = {
            let mut state = slot.state.lock().await;
            let had_state = state.has_live_state();
            state.cancel_reconnect();
            let connecting = state
                .in_flight
                .as_ref()
                .filter(|f| f.handle.is_none())
                .map(|f| f.generation);
            if connecting.is_some() {
                state.pending_logout = connecting;
            }
            let handle = state.clear();
            slot.publish(&state);

            let removed = self.inner.store.delete(account).await?;
            info!(
                "Closed session for '{}' (credentials removed: {})",
                account, removed
            );
            (had_state, handle)
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.terminate().await {
                warn!("Logout for '{}' failed, continuing: {}", account, e);
            }
        }
        Ok(had_state)
    }

    /// Accounts the manager has seen since start, sorted.
    pub async fn accounts(&self) -> Vec<String> {
        let map = self.inner.accounts.lock().await;
        let mut accounts: Vec<String> = map.keys().cloned().collect();
        accounts.sort();
        accounts
    }

    /// Starts every account that has stored credentials. Failures are logged
    /// per account and do not stop the others. Returns how many started.
    pub async fn restore_all(&self) -> Result<usize, SessionError> {
        let accounts = self.inner.store.list_accounts().await?;
        info!("Restoring sessions: {:?}", accounts);

        let mut started = 0;
        for account in accounts {
            match self.ensure_connected(&account).await {
                Ok(_) => started += 1,
                Err(e) => error!("Could not restore session for '{}': {}", account, e),
            }
        }
        Ok(started)
    }

    /// Cancels reconnect timers and drops live handles without logging out,
    /// so credentials stay valid for the next start.
    pub async fn shutdown(&self) {
        let slots: Vec<(String, Arc<AccountSlot>)> = {
            let map = self.inner.accounts.lock().await;
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (account, slot) in slots {
            let mut state = slot.state.lock().await;
            state.cancel_reconnect();
            if state.clear().is_some() {
                debug!("Dropped connection for '{}'", account);
            }
            slot.publish(&state);
        }
        info!("Session manager stopped");
    }
}

fn render_pairing(image: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(image))
}
