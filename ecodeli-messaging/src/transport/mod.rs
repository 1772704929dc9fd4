//! Transport session abstraction.
//!
//! Defines the [`Transport`] trait every session implementation satisfies.
//! Concrete implementations:
//! - [`ws::WsSession`]: WebSocket session with automatic reconnection
//! - [`memory::MemoryTransport`]: in-process fake for tests and demos
//!
//! A transport owns exactly one connection for the logged-in user and carries
//! no business logic: it turns intents into [`ClientEvent`]s and fans decoded
//! server events out through its [`EventHub`].

pub mod hub;
pub mod memory;
pub mod ws;

use std::fmt;

use ecodeli_proto::events::ClientEvent;
use ecodeli_proto::message::{MessageId, TempId};
use ecodeli_proto::user::UserId;

pub use hub::{EventHub, PresenceUpdate, Registry, Subscription};

/// Connection lifecycle of a transport session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and authenticated.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Errors reported through the transport's error channel.
///
/// Transports never return these from their fire-and-forget operations;
/// they are delivered to subscribers of [`EventHub::errors`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The configured endpoint is not a valid URL.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    /// The connection attempt did not complete in time.
    #[error("connection attempt timed out")]
    Timeout,

    /// The connection attempt was refused or failed during the handshake.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Reconnection gave up after the configured number of attempts.
    #[error("gave up after {0} connection attempts")]
    RetriesExhausted(u32),

    /// The socket failed while connected.
    #[error("socket error: {0}")]
    Socket(String),

    /// A frame could not be decoded.
    #[error("undecodable frame: {0}")]
    Codec(String),

    /// The server reported an error event.
    #[error("server error: {0}")]
    Server(String),
}

/// A chat message to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Addressee.
    pub receiver_id: UserId,
    /// Text body.
    pub content: String,
    /// Correlation token the server echoes back.
    pub temp_id: TempId,
}

/// A session-scoped bidirectional connection to the messaging backend.
///
/// All outbound operations are fire-and-forget: they return `true` when the
/// event was handed to an open connection and `false` (after logging) when
/// the session is not connected. Nothing is queued for later delivery.
pub trait Transport: Send + Sync {
    /// Opens the session for `user_id`. No-op while connecting or connected.
    fn connect(&self, user_id: UserId);

    /// Closes the session and cancels any pending reconnection.
    fn disconnect(&self);

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Subscriber registries for inbound events.
    fn events(&self) -> &EventHub;

    /// Hands one client event to the open connection.
    fn dispatch(&self, event: ClientEvent) -> bool;

    /// Whether the session is connected and authenticated.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Sends a chat message.
    fn send_message(&self, message: OutgoingMessage) -> bool {
        self.dispatch(ClientEvent::SendMessage {
            receiver_id: message.receiver_id,
            content: message.content,
            temp_id: message.temp_id,
        })
    }

    /// Tells the server a message was read.
    fn mark_as_read(&self, message_id: MessageId) -> bool {
        self.dispatch(ClientEvent::MarkRead { message_id })
    }

    /// Sends an ephemeral typing notification.
    fn send_typing(&self, receiver_id: UserId) -> bool {
        self.dispatch(ClientEvent::Typing { receiver_id })
    }
}
