use super::protocol::{Inbound, Outbound};
use crate::connections::{
    errors::ConnectionError, ConnectionProvider, DisconnectReason, ProviderConnection,
    ProviderEvent, ProviderSession,
};
use crate::core::message::OutgoingMessage;
use crate::storage::credentials::CredentialState;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type Reply = oneshot::Sender<Result<(), ConnectionError>>;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// WebSocket endpoint of the sidecar, e.g. `ws://127.0.0.1:8787`.
    pub url: String,
    /// Appended to destinations that carry no `@domain` part.
    pub recipient_suffix: String,
    /// Bound for the socket handshake and for each acknowledged request.
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787".into(),
            recipient_suffix: "@s.whatsapp.net".into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Speaks to an external sidecar that implements the messaging protocol.
///
/// Every account gets its own WebSocket. The sidecar reports lifecycle
/// events on it and acknowledges `send`/`logout` requests by id.
pub struct BridgeProvider {
    config: BridgeConfig,
}

impl BridgeProvider {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionProvider for BridgeProvider {
    async fn connect(
        &self,
        account: &str,
        credentials: CredentialState,
    ) -> Result<ProviderConnection, ConnectionError> {
        info!("Opening bridge socket for '{}' at {}", account, self.config.url);
        let (ws, _) = timeout(
            self.config.request_timeout,
            connect_async(self.config.url.as_str()),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(self.config.request_timeout))??;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let start = Outbound::Start {
            account: account.to_string(),
            credentials,
        };
        tokio::spawn(run_event_loop(
            account.to_string(),
            ws,
            start,
            command_rx,
            events_tx,
        ));

        Ok(ProviderConnection {
            session: Arc::new(BridgeSession {
                command_tx,
                recipient_suffix: self.config.recipient_suffix.clone(),
                request_timeout: self.config.request_timeout,
            }),
            events: events_rx,
        })
    }
}

enum Command {
    Request { id: Uuid, frame: Outbound, reply: Reply },
    /// Drop the correlation entry of a timed-out request.
    Forget(Uuid),
}

/// Dropping the last handle closes the socket.
struct BridgeSession {
    command_tx: mpsc::UnboundedSender<Command>,
    recipient_suffix: String,
    request_timeout: Duration,
}

impl BridgeSession {
    fn recipient(&self, destination: &str) -> String {
        if destination.contains('@') {
            destination.to_string()
        } else {
            format!("{destination}{}", self.recipient_suffix)
        }
    }

    async fn request(&self, id: Uuid, frame: Outbound) -> Result<(), ConnectionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Request { id, frame, reply })
            .map_err(|_| ConnectionError::Closed)?;

        match timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => {
                let _ = self.command_tx.send(Command::Forget(id));
                Err(ConnectionError::Timeout(self.request_timeout))
            }
        }
    }
}

#[async_trait]
impl ProviderSession for BridgeSession {
    async fn send(
        &self,
        destination: &str,
        message: &OutgoingMessage,
    ) -> Result<(), ConnectionError> {
        let id = Uuid::new_v4();
        let frame = Outbound::Send {
            id,
            to: self.recipient(destination),
            message: message.clone(),
        };
        self.request(id, frame).await
    }

    async fn terminate(&self) -> Result<(), ConnectionError> {
        let id = Uuid::new_v4();
        self.request(id, Outbound::Logout { id }).await
    }
}

async fn send_frame(sink: &mut WsSink, frame: &Outbound) -> Result<(), ConnectionError> {
    let json = serde_json::to_string(frame)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

fn to_event(account: &str, frame: Inbound) -> Option<ProviderEvent> {
    match frame {
        Inbound::Pairing { image } => match STANDARD.decode(image.as_bytes()) {
            Ok(bytes) => Some(ProviderEvent::Pairing(bytes)),
            Err(e) => {
                warn!("Undecodable pairing image for '{}': {}", account, e);
                None
            }
        },
        Inbound::Opened => Some(ProviderEvent::Opened),
        Inbound::Closed { status_code } => Some(ProviderEvent::Closed(
            DisconnectReason::from_code(status_code),
        )),
        Inbound::Credentials { entries } => Some(ProviderEvent::CredentialsUpdated(entries)),
        Inbound::Ack { .. } => None,
    }
}

/// Per-socket task: forwards sidecar events, writes requests and resolves
/// their acknowledgements. Ends when the socket closes or every handle is
/// dropped; the event sender is dropped with it.
async fn run_event_loop(
    account: String,
    ws: WsStream,
    start: Outbound,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::Sender<ProviderEvent>,
) {
    let (mut ws_write, mut ws_read) = ws.split();
    let mut pending: HashMap<Uuid, Reply> = HashMap::new();

    if let Err(e) = send_frame(&mut ws_write, &start).await {
        warn!("Bridge start for '{}' failed: {}", account, e);
        return;
    }
    debug!("Bridge session started for '{}'", account);

    loop {
        tokio::select! {
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match serde_json::from_str::<Inbound>(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("Unparseable bridge frame for '{}': {}", account, e);
                                continue;
                            }
                        };
                        if let Inbound::Ack { id, ok, error } = &frame {
                            match pending.remove(id) {
                                Some(reply) => {
                                    let result = if *ok {
                                        Ok(())
                                    } else {
                                        Err(ConnectionError::Rejected(
                                            error.clone().unwrap_or_else(|| "unspecified".into()),
                                        ))
                                    };
                                    let _ = reply.send(result);
                                }
                                None => debug!("Ack for unknown request {}", id),
                            }
                            continue;
                        }
                        if let Some(event) = to_event(&account, frame) {
                            if events_tx.send(event).await.is_err() {
                                debug!("Event receiver for '{}' is gone", account);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Bridge socket for '{}' closed by remote", account);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Bridge socket error for '{}': {}", account, e);
                        break;
                    }
                    // Binary, Ping, Pong
                    Some(Ok(_)) => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(Command::Request { id, frame, reply }) => {
                        pending.insert(id, reply);
                        if let Err(e) = send_frame(&mut ws_write, &frame).await {
                            if let Some(reply) = pending.remove(&id) {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    Some(Command::Forget(id)) => {
                        pending.remove(&id);
                    }
                    None => {
                        debug!("All handles for '{}' dropped, closing bridge socket", account);
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(ConnectionError::Closed));
    }
    debug!("Bridge event loop ended for '{}'", account);
}
