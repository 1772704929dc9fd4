//! WebSocket transport session.
//!
//! [`WsSession`] owns one connection to the messaging backend. The user id is
//! presented twice: as a `userId` query parameter during the handshake and as
//! an explicit `authenticate` event once the socket is open, because the two
//! may race independently across reconnects.
//!
//! A background supervisor task drives the connection:
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!      ▲                          │                  │
//!      │                     fail (≤ N times,        │ socket drop
//!      │                      fixed delay)           ▼
//!      └──── disconnect() ◀────────────────── Disconnected (retrying)
//! ```
//!
//! Every successful (re)connect re-sends `authenticate` before any other
//! outbound frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use ecodeli_proto::events::{self, ClientEvent};
use ecodeli_proto::user::UserId;

use super::{ConnectionState, EventHub, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection and retry settings for a [`WsSession`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4000/ws".to_string(),
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// State shared between the session handle and its supervisor task.
struct Shared {
    hub: EventHub,
    state: Mutex<ConnectionState>,
    /// Sender into the live connection's writer, present only while connected.
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientEvent>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every `connect()`; a supervisor only touches state while its
    /// epoch is current.
    epoch: AtomicU64,
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn set_state(&self, epoch: u64, next: ConnectionState) {
        if !self.is_current(epoch) {
            return;
        }
        let changed = {
            let mut state = self.state.lock();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            tracing::debug!(state = %next, "session state changed");
            self.hub.connection.emit(&next);
        }
    }

    fn go_connected(&self, epoch: u64, outbound: mpsc::UnboundedSender<ClientEvent>) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        *self.outbound.lock() = Some(outbound);
        self.set_state(epoch, ConnectionState::Connected);
        true
    }

    fn go_disconnected(&self, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }
        self.outbound.lock().take();
        self.set_state(epoch, ConnectionState::Disconnected);
    }
}

/// WebSocket implementation of [`Transport`].
///
/// Created disconnected; [`connect`](Transport::connect) spawns the
/// supervisor on the current tokio runtime.
pub struct WsSession {
    config: WsConfig,
    shared: Arc<Shared>,
}

impl WsSession {
    /// Creates a disconnected session.
    #[must_use]
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                hub: EventHub::new(),
                state: Mutex::new(ConnectionState::Disconnected),
                outbound: Mutex::new(None),
                shutdown: Mutex::new(None),
                supervisor: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// The endpoint this session connects to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Whether a supervisor task is still running (connected or retrying).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared
            .supervisor
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Transport for WsSession {
    fn connect(&self, user_id: UserId) {
        if self.is_active() || self.state() != ConnectionState::Disconnected {
            tracing::debug!(user_id = %user_id, "connect ignored, session already active");
            return;
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shared.shutdown.lock() = Some(shutdown_tx);
        self.shared.set_state(epoch, ConnectionState::Connecting);

        tracing::info!(user_id = %user_id, url = %self.config.url, "opening messaging session");
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            self.config.clone(),
            user_id,
            epoch,
            shutdown_rx,
        ));
        *self.shared.supervisor.lock() = Some(handle);
    }

    fn disconnect(&self) {
        if let Some(shutdown) = self.shared.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        self.shared.supervisor.lock().take();

        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        self.shared.go_disconnected(epoch);
        // Retire the epoch so a supervisor still winding down cannot touch
        // state that a later connect() owns.
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        tracing::info!("messaging session closed");
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    fn events(&self) -> &EventHub {
        &self.shared.hub
    }

    fn dispatch(&self, event: ClientEvent) -> bool {
        let sent = self
            .shared
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok());
        if !sent {
            tracing::warn!("session not connected, dropping outbound event");
        }
        sent
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shared.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
    }
}

/// Background task owning the connection and its reconnection policy.
async fn supervise(
    shared: Arc<Shared>,
    config: WsConfig,
    user_id: UserId,
    epoch: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures = 0u32;

    loop {
        if *shutdown.borrow() {
            return;
        }
        shared.set_state(epoch, ConnectionState::Connecting);

        let attempt = tokio::select! {
            result = open(&config, user_id) => result,
            _ = shutdown.changed() => return,
        };

        match attempt {
            Ok(stream) => {
                failures = 0;
                let (tx, rx) = mpsc::unbounded_channel();
                // Queued first so it precedes anything sent after Connected.
                let _ = tx.send(ClientEvent::Authenticate { user_id });
                if !shared.go_connected(epoch, tx) {
                    return;
                }
                tracing::info!(user_id = %user_id, "messaging session connected");

                if run_connection(stream, rx, &shared, &mut shutdown).await {
                    return;
                }
                tracing::info!(user_id = %user_id, "messaging session dropped, reconnecting");
                shared.go_disconnected(epoch);
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    attempt = failures,
                    max_attempts = config.max_attempts,
                    error = %e,
                    "messaging connection attempt failed"
                );
                if shared.is_current(epoch) {
                    shared.hub.errors.emit(&e);
                }
                if failures >= config.max_attempts {
                    tracing::error!(attempts = failures, "giving up on messaging connection");
                    shared.go_disconnected(epoch);
                    if shared.is_current(epoch) {
                        shared
                            .hub
                            .errors
                            .emit(&TransportError::RetriesExhausted(failures));
                    }
                    return;
                }
            }
        }

        tokio::select! {
            () = tokio::time::sleep(config.retry_delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Opens the socket, presenting the user id as a handshake credential.
async fn open(config: &WsConfig, user_id: UserId) -> Result<WsStream, TransportError> {
    let mut url =
        url::Url::parse(&config.url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("userId", &user_id.to_string());

    let (stream, _response) = tokio::time::timeout(config.connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    Ok(stream)
}

/// Pumps one live connection until it drops or shutdown is requested.
///
/// Returns `true` when the loop ended because of shutdown.
async fn run_connection(
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return true;
            }
            next = outbound.recv() => {
                let Some(event) = next else {
                    return false;
                };
                match events::encode_client(&event) {
                    Ok(frame) => {
                        if let Err(e) = sink.send(WsMessage::text(frame)).await {
                            tracing::warn!(error = %e, "socket write failed");
                            shared.hub.errors.emit(&TransportError::Socket(e.to_string()));
                            return false;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "could not encode outbound event"),
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => match events::decode_server(text.as_str()) {
                    Ok(event) => shared.hub.dispatch(event),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping undecodable frame");
                        shared.hub.errors.emit(&TransportError::Codec(e.to_string()));
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::info!("messaging socket closed by server");
                    return false;
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames carry nothing for us.
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "messaging socket read error");
                    shared.hub.errors.emit(&TransportError::Socket(e.to_string()));
                    return false;
                }
            },
        }
    }
}
