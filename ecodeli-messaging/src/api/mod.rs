//! REST access to the messaging backend.
//!
//! The [`Backend`] trait covers the four endpoints the messaging core
//! consumes. Implementations:
//! - [`http::HttpBackend`]: reqwest client against the real API
//! - [`memory::MemoryBackend`]: scripted in-memory backend for tests
//!
//! Responses come back already normalized through `ecodeli_proto::rest`, so
//! callers only ever see canonical records.

pub mod http;
pub mod memory;

use std::future::Future;

use ecodeli_proto::message::{Message, MessageId};
use ecodeli_proto::rest::ConversationSummary;
use ecodeli_proto::user::User;

/// Errors from REST calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The configured base URL or a derived endpoint is invalid.
    #[error("invalid api url: {0}")]
    InvalidUrl(String),

    /// The request could not be sent or the response body could not be read.
    #[error("request to {endpoint} failed: {reason}")]
    Request {
        /// Endpoint path that was called.
        endpoint: String,
        /// Underlying failure.
        reason: String,
    },

    /// The server answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}")]
    Status {
        /// Endpoint path that was called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// A scripted failure from the in-memory backend.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// The REST endpoints of the messaging backend.
///
/// A malformed response shape is not an error: implementations return an
/// empty collection. Errors are reserved for transport and status failures.
pub trait Backend: Send + Sync {
    /// `GET` the conversation summaries of the logged-in user.
    fn fetch_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, ApiError>> + Send;

    /// `GET` the full inbox (every message to or from the logged-in user).
    fn fetch_inbox(&self) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    /// `PUT` the read flag of one message.
    fn mark_read(&self, message_id: MessageId)
    -> impl Future<Output = Result<(), ApiError>> + Send;

    /// `GET` the directory of users the logged-in user may message.
    fn fetch_available_users(&self) -> impl Future<Output = Result<Vec<User>, ApiError>> + Send;
}
