//! Scripted in-memory [`Backend`] for tests and offline demos.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use ecodeli_proto::message::{Message, MessageId};
use ecodeli_proto::rest::ConversationSummary;
use ecodeli_proto::user::User;

use super::{ApiError, Backend};

/// In-memory backend with injectable failures.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    conversations: Mutex<Vec<ConversationSummary>>,
    inbox: Mutex<Vec<Message>>,
    users: Mutex<Vec<User>>,
    failing_reads: Mutex<HashSet<MessageId>>,
    acknowledged: Mutex<Vec<MessageId>>,
    offline: Mutex<bool>,
    inbox_fetches: AtomicUsize,
    directory_fetches: AtomicUsize,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the conversation summaries.
    pub fn set_conversations(&self, rows: Vec<ConversationSummary>) {
        *self.conversations.lock() = rows;
    }

    /// Replaces the inbox.
    pub fn set_inbox(&self, messages: Vec<Message>) {
        *self.inbox.lock() = messages;
    }

    /// Appends one message to the inbox.
    pub fn push_inbox(&self, message: Message) {
        self.inbox.lock().push(message);
    }

    /// Replaces the user directory.
    pub fn set_users(&self, users: Vec<User>) {
        *self.users.lock() = users;
    }

    /// Makes read acknowledgements for `message_id` fail.
    pub fn fail_read(&self, message_id: MessageId) {
        self.failing_reads.lock().insert(message_id);
    }

    /// Makes every call fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    /// Ids whose read acknowledgement succeeded, in call order.
    #[must_use]
    pub fn acknowledged(&self) -> Vec<MessageId> {
        self.acknowledged.lock().clone()
    }

    /// Number of inbox fetches served.
    #[must_use]
    pub fn inbox_fetches(&self) -> usize {
        self.inbox_fetches.load(Ordering::SeqCst)
    }

    /// Number of directory fetches served.
    #[must_use]
    pub fn directory_fetches(&self) -> usize {
        self.directory_fetches.load(Ordering::SeqCst)
    }

    fn check_online(&self, endpoint: &str) -> Result<(), ApiError> {
        if *self.offline.lock() {
            return Err(ApiError::Unavailable(endpoint.to_string()));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        self.check_online("conversations")?;
        Ok(self.conversations.lock().clone())
    }

    async fn fetch_inbox(&self) -> Result<Vec<Message>, ApiError> {
        self.check_online("inbox")?;
        self.inbox_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.inbox.lock().clone())
    }

    async fn mark_read(&self, message_id: MessageId) -> Result<(), ApiError> {
        self.check_online("mark read")?;
        if self.failing_reads.lock().contains(&message_id) {
            return Err(ApiError::Unavailable(format!("mark read {message_id}")));
        }
        self.acknowledged.lock().push(message_id);
        if let Some(msg) = self.inbox.lock().iter_mut().find(|m| m.id == message_id) {
            msg.is_read = true;
        }
        Ok(())
    }

    async fn fetch_available_users(&self) -> Result<Vec<User>, ApiError> {
        self.check_online("available users")?;
        self.directory_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.lock().clone())
    }
}
