//! WebSocket event vocabulary and JSON text-frame codec.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Client events are strongly typed in both directions. Server events are
//! decoded leniently: message payloads go through the same normalizing
//! adapter as REST payloads, so spelling differences never reach the core.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::message::{Message, MessageId, TempId};
use crate::presence::PresenceStatus;
use crate::rest;
use crate::user::UserId;

/// Error type for event encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON or does not match the event shape.
    #[error("invalid event frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame names an event this client does not understand.
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    /// The event is known but its payload lacks required fields.
    #[error("malformed {event} payload")]
    MalformedPayload {
        /// Name of the event whose payload was rejected.
        event: String,
    },
}

/// Events sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Binds the connection to a user after the socket is open.
    #[serde(rename_all = "camelCase")]
    Authenticate {
        /// The logged-in user.
        user_id: UserId,
    },
    /// Sends a chat message.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        /// Addressee.
        receiver_id: UserId,
        /// Text body.
        content: String,
        /// Correlation token echoed back with the confirmation.
        temp_id: TempId,
    },
    /// Notifies the server that a message was read.
    #[serde(rename_all = "camelCase")]
    MarkRead {
        /// The message that was read.
        message_id: MessageId,
    },
    /// Ephemeral typing notification.
    #[serde(rename_all = "camelCase")]
    Typing {
        /// The peer being typed to.
        receiver_id: UserId,
    },
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A message addressed to or authored by the local user.
    NewMessage(Message),
    /// Confirmation of a message the local user sent.
    MessageSent(Message),
    /// A peer is typing to the local user.
    UserTyping {
        /// The typing peer.
        user_id: UserId,
    },
    /// A peer's presence changed.
    UserStatusChange {
        /// The peer.
        user_id: UserId,
        /// New status.
        status: PresenceStatus,
    },
    /// Server-side error report.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageSent(_) => "message_sent",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStatusChange { .. } => "user_status_change",
            Self::Error { .. } => "error",
        }
    }
}

/// Encodes a client event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes a client event from a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the frame is not a known client event.
pub fn decode_client(frame: &str) -> Result<ClientEvent, CodecError> {
    Ok(serde_json::from_str(frame)?)
}

/// Encodes a server event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    let data = match event {
        ServerEvent::NewMessage(msg) | ServerEvent::MessageSent(msg) => serde_json::to_value(msg)?,
        ServerEvent::UserTyping { user_id } => json!({ "userId": user_id }),
        ServerEvent::UserStatusChange { user_id, status } => {
            json!({ "userId": user_id, "status": status })
        }
        ServerEvent::Error { message } => json!({ "message": message }),
    };
    Ok(serde_json::to_string(&json!({ "event": event.name(), "data": data }))?)
}

/// Decodes a server event from a JSON text frame.
///
/// Accepts `type` as an alias for `event`, and payload fields inlined next to
/// the event name when `data` is absent.
///
/// # Errors
///
/// - [`CodecError::Json`] if the frame is not JSON.
/// - [`CodecError::UnknownEvent`] for unrecognized event names.
/// - [`CodecError::MalformedPayload`] when required payload fields are missing.
pub fn decode_server(frame: &str) -> Result<ServerEvent, CodecError> {
    let value: Value = serde_json::from_str(frame)?;
    let name = value
        .get("event")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::UnknownEvent("<missing>".into()))?;
    let data = value.get("data").unwrap_or(&value);
    let malformed = || CodecError::MalformedPayload {
        event: name.to_string(),
    };

    match name {
        "new_message" => rest::normalize_message(data)
            .map(ServerEvent::NewMessage)
            .ok_or_else(malformed),
        "message_sent" => rest::normalize_message(data)
            .map(ServerEvent::MessageSent)
            .ok_or_else(malformed),
        "user_typing" => user_id(data)
            .map(|user_id| ServerEvent::UserTyping { user_id })
            .ok_or_else(malformed),
        "user_status_change" => {
            let user_id = user_id(data).ok_or_else(malformed)?;
            let status = data
                .get("status")
                .and_then(Value::as_str)
                .map_or(PresenceStatus::Offline, PresenceStatus::parse_lenient);
            Ok(ServerEvent::UserStatusChange { user_id, status })
        }
        "error" => Ok(ServerEvent::Error {
            message: data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified server error")
                .to_string(),
        }),
        other => Err(CodecError::UnknownEvent(other.to_string())),
    }
}

fn user_id(data: &Value) -> Option<UserId> {
    let raw = data.get("userId").or_else(|| data.get("user_id"))?;
    raw.as_i64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
        .map(UserId::new)
}
