//! Normalizing adapters for backend payloads.
//!
//! The backend is inconsistent about field spelling: the same record may
//! arrive with `sender_id` or `senderId`, `is_read` or `isRead`, ids as
//! numbers or numeric strings. Every payload that enters the messaging core
//! goes through one of the `parse_*` functions here and comes out in the
//! canonical shape. Records that lack a required field are skipped; a payload
//! whose top-level shape is unexpected yields an empty result.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::message::{Delivery, Message, MessageId, TempId};
use crate::presence::PresenceStatus;
use crate::user::{Role, User, UserId};

/// One row of the conversations summary endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    /// The peer on the other side.
    pub recipient_id: UserId,
    /// Peer display name.
    pub recipient_name: String,
    /// Preview of the newest message.
    pub last_message: Option<String>,
    /// Time of the newest message.
    pub last_message_time: Option<DateTime<Utc>>,
    /// Unread count as reported by the server.
    pub unread_count: usize,
    /// Peer presence as reported by the server.
    pub status: PresenceStatus,
}

/// Returns the first field present under any of `keys`.
fn field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn int_field(obj: &Value, keys: &[&str]) -> Option<i64> {
    match field(obj, keys)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn str_field(obj: &Value, keys: &[&str]) -> Option<String> {
    match field(obj, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn bool_field(obj: &Value, keys: &[&str]) -> Option<bool> {
    match field(obj, keys)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn time_field(obj: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    match field(obj, keys)? {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Parses an RFC 3339 timestamp, or a naive `YYYY-MM-DD HH:MM:SS` one taken
/// as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Unwraps the list inside a payload.
///
/// Accepts a bare array or an object wrapping one under `data`, plus the
/// given extra wrapper keys. Anything else is treated as an empty list.
fn list<'a>(payload: &'a Value, wrappers: &[&str]) -> &'a [Value] {
    if let Value::Array(items) = payload {
        return items;
    }
    std::iter::once("data")
        .chain(wrappers.iter().copied())
        .find_map(|k| payload.get(k).and_then(Value::as_array))
        .map_or(&[][..], Vec::as_slice)
}

/// Normalizes one user record.
///
/// Requires an id; name parts fall back to a single `name` field split on
/// whitespace.
#[must_use]
pub fn normalize_user(raw: &Value) -> Option<User> {
    let id = UserId::new(int_field(raw, &["id", "userId", "user_id"])?);
    let first = str_field(raw, &["firstName", "first_name", "firstname"]);
    let last = str_field(raw, &["lastName", "last_name", "lastname"]);
    let mut user = match (first, last) {
        (None, None) => match str_field(raw, &["name", "fullName", "full_name"]) {
            Some(name) => User::from_display_name(id, &name),
            None => User::placeholder(id),
        },
        (first, last) => User::new(id, first.unwrap_or_default(), last.unwrap_or_default()),
    };
    user.role = str_field(raw, &["role", "userType", "user_type", "type"])
        .as_deref()
        .and_then(Role::parse);
    user.avatar = str_field(
        raw,
        &["avatar", "avatarUrl", "avatar_url", "profilePicture", "profile_picture"],
    );
    Some(user)
}

/// Normalizes one message record.
///
/// Requires server id, sender id, and receiver id. A missing timestamp is
/// taken as the time of normalization.
#[must_use]
pub fn normalize_message(raw: &Value) -> Option<Message> {
    let id = MessageId::new(int_field(raw, &["id", "messageId", "message_id"])?);
    let sender_id = UserId::new(int_field(raw, &["senderId", "sender_id", "from"])?);
    let receiver_id = UserId::new(int_field(raw, &["receiverId", "receiver_id", "to"])?);
    let content = str_field(raw, &["content", "message", "text"]).unwrap_or_default();
    let created_at = time_field(
        raw,
        &["createdAt", "created_at", "timestamp", "sentAt", "sent_at"],
    )
    .unwrap_or_else(Utc::now);

    Some(Message {
        id,
        sender_id,
        receiver_id,
        content,
        is_read: bool_field(raw, &["isRead", "is_read", "read"]).unwrap_or(false),
        created_at,
        temp_id: str_field(raw, &["tempId", "temp_id"]).map(TempId::new),
        sender: field(raw, &["sender"]).and_then(normalize_user),
        delivery: Delivery::Confirmed,
    })
}

/// Normalizes one conversation summary row. Requires a recipient id.
#[must_use]
pub fn normalize_summary(raw: &Value) -> Option<ConversationSummary> {
    let recipient_id = UserId::new(int_field(
        raw,
        &["recipientId", "recipient_id", "userId", "user_id"],
    )?);
    let unread = int_field(raw, &["unreadCount", "unread_count"]).unwrap_or(0);
    Some(ConversationSummary {
        recipient_id,
        recipient_name: str_field(raw, &["recipientName", "recipient_name", "name"])
            .unwrap_or_default(),
        last_message: str_field(raw, &["lastMessage", "last_message"]),
        last_message_time: time_field(raw, &["lastMessageTime", "last_message_time"]),
        unread_count: usize::try_from(unread).unwrap_or(0),
        status: str_field(raw, &["status"])
            .map_or(PresenceStatus::Offline, |s| PresenceStatus::parse_lenient(&s)),
    })
}

/// Parses the conversations summary payload.
#[must_use]
pub fn parse_conversations(payload: &Value) -> Vec<ConversationSummary> {
    list(payload, &["conversations"])
        .iter()
        .filter_map(normalize_summary)
        .collect()
}

/// Parses an inbox payload into canonical messages.
#[must_use]
pub fn parse_messages(payload: &Value) -> Vec<Message> {
    list(payload, &["messages"])
        .iter()
        .filter_map(normalize_message)
        .collect()
}

/// Parses the directory of users available to message.
#[must_use]
pub fn parse_users(payload: &Value) -> Vec<User> {
    list(payload, &["users"])
        .iter()
        .filter_map(normalize_user)
        .collect()
}
