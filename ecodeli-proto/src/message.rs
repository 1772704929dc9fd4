//! Canonical message model.
//!
//! A [`Message`] is either still optimistic (rendered locally before the
//! server confirmed it, identified by a [`TempId`] and a placeholder id) or
//! confirmed (carrying the server-assigned [`MessageId`]). The two keys serve
//! different matching passes during reconciliation and are never conflated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::{User, UserId};

/// Server-assigned message id, or a negative placeholder before confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    /// Wraps a raw message id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this id was generated locally rather than by the server.
    #[must_use]
    pub const fn is_placeholder(self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated correlation token linking an optimistic message to its
/// server echo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    /// Generates a fresh, locally unique token (UUID v7 based).
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("temp-{}", Uuid::now_v7()))
    }

    /// Wraps an existing token, e.g. one echoed back by the server.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a message stands relative to server confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Rendered locally, handed to the transport, not yet echoed.
    Optimistic,
    /// Rendered locally but the transport was not connected at send time.
    Unsent,
    /// Carries a server-assigned id.
    Confirmed,
}

/// A one-to-one chat message in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id, or a placeholder while optimistic.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Addressee.
    pub receiver_id: UserId,
    /// Text body.
    pub content: String,
    /// Whether the receiver has read it.
    pub is_read: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Correlation token, present on self-sent messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
    /// Author details, when the event carried them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<User>,
    /// Confirmation state. Not part of the wire shape.
    #[serde(skip)]
    pub delivery: Delivery,
}

impl Message {
    /// Builds a server-confirmed message.
    pub fn confirmed(
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            content: content.into(),
            is_read: false,
            created_at,
            temp_id: None,
            sender: None,
            delivery: Delivery::Confirmed,
        }
    }

    /// Builds a locally-originated message awaiting its echo.
    pub fn optimistic(
        placeholder: MessageId,
        temp_id: TempId,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: placeholder,
            sender_id,
            receiver_id,
            content: content.into(),
            is_read: false,
            created_at,
            temp_id: Some(temp_id),
            sender: None,
            delivery: Delivery::Optimistic,
        }
    }

    /// Whether the message carries a server-assigned id.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.delivery == Delivery::Confirmed
    }

    /// The other participant from `local`'s point of view.
    #[must_use]
    pub fn peer_of(&self, local: UserId) -> UserId {
        if self.sender_id == local {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    /// Whether `local` received (rather than wrote) this message.
    #[must_use]
    pub fn is_received_by(&self, local: UserId) -> bool {
        self.receiver_id == local && self.sender_id != local
    }

    /// Whether this message shares a correlation token with `other`.
    #[must_use]
    pub fn shares_temp_id(&self, other: &Self) -> bool {
        matches!((&self.temp_id, &other.temp_id), (Some(a), Some(b)) if a == b)
    }
}
