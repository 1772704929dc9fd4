//! In-memory conversation state and reconciliation.
//!
//! [`ConversationStore`] keeps one [`Conversation`] per peer. Every message,
//! whether optimistic, echoed, relayed from a peer, or replayed after a
//! reconnect, enters through [`ConversationStore::reconcile`], which
//! guarantees a message is never listed twice:
//!
//! - a shared correlation token replaces the optimistic entry in place
//! - a server id already present is ignored
//! - anything else is inserted in timestamp order
//!
//! The conversation list is published copy-on-write: [`snapshot`] hands out
//! an `Arc` that later mutations never touch.
//!
//! [`snapshot`]: ConversationStore::snapshot

pub mod typing;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use ecodeli_proto::message::{Delivery, Message, MessageId, TempId};
use ecodeli_proto::presence::PresenceStatus;
use ecodeli_proto::rest::ConversationSummary;
use ecodeli_proto::user::{User, UserId};

pub use typing::{TypingExpiry, TypingTracker};

/// Preview of the newest message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    /// Text of the newest message.
    pub content: String,
    /// When it was written, if known.
    pub created_at: Option<DateTime<Utc>>,
    /// Its author, if known.
    pub sender_id: Option<UserId>,
}

impl Preview {
    fn of(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            created_at: Some(message.created_at),
            sender_id: Some(message.sender_id),
        }
    }
}

/// A one-to-one conversation with a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Synthetic id derived from the peer id.
    pub id: String,
    /// The other participant.
    pub recipient: User,
    /// Newest message, if any.
    pub last_message: Option<Preview>,
    /// Received messages not yet read.
    pub unread_count: usize,
    /// Messages, oldest first.
    pub messages: Vec<Message>,
    /// Peer presence, last writer wins.
    pub status: PresenceStatus,
    /// Whether the peer is currently typing.
    pub is_typing: bool,
}

impl Conversation {
    /// Creates an empty conversation with `recipient`.
    #[must_use]
    pub fn new(recipient: User) -> Self {
        Self {
            id: conversation_id(recipient.id),
            recipient,
            last_message: None,
            unread_count: 0,
            messages: Vec::new(),
            status: PresenceStatus::default(),
            is_typing: false,
        }
    }

    /// The peer id this conversation is keyed by.
    #[must_use]
    pub const fn peer(&self) -> UserId {
        self.recipient.id
    }

    fn refresh_preview(&mut self) {
        if let Some(newest) = self.messages.last() {
            self.last_message = Some(Preview::of(newest));
        }
    }

    fn recount_unread(&mut self, local: UserId) {
        self.unread_count = self
            .messages
            .iter()
            .filter(|m| m.is_received_by(local) && !m.is_read)
            .count();
    }

    /// Inserts after every entry with an equal or earlier timestamp.
    fn insert_ordered(&mut self, message: Message) {
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
    }
}

/// The synthetic conversation id for `peer`.
#[must_use]
pub fn conversation_id(peer: UserId) -> String {
    format!("conv-{peer}")
}

/// What reconciliation did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Added as a new entry.
    Inserted,
    /// Replaced the optimistic entry sharing its correlation token.
    Replaced,
    /// Already present by server id; nothing changed.
    Duplicate,
}

/// Result of [`ConversationStore::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// The conversation the message belongs to.
    pub peer: UserId,
    /// Whether the conversation was created for this message.
    pub created: bool,
    /// What happened to the message.
    pub change: Change,
    /// Set when an unread peer message landed in the selected conversation
    /// and should be acknowledged.
    pub needs_ack: Option<MessageId>,
}

/// Conversation state for one logged-in user.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    local: UserId,
    conversations: Arc<Vec<Conversation>>,
    selected: Option<UserId>,
    next_placeholder: i64,
}

impl ConversationStore {
    /// Creates an empty store for `local`.
    #[must_use]
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            conversations: Arc::new(Vec::new()),
            selected: None,
            next_placeholder: -1,
        }
    }

    /// The logged-in user.
    #[must_use]
    pub const fn local(&self) -> UserId {
        self.local
    }

    /// The current conversation list, most recent activity first.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Conversation>> {
        Arc::clone(&self.conversations)
    }

    /// Looks up the conversation with `peer`.
    #[must_use]
    pub fn conversation(&self, peer: UserId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.peer() == peer)
    }

    /// Number of conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether there are no conversations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// The selected conversation's peer.
    #[must_use]
    pub const fn selected(&self) -> Option<UserId> {
        self.selected
    }

    /// Selects the conversation with `peer`, or clears the selection.
    ///
    /// Returns `false` (and leaves the selection alone) for an unknown peer.
    pub fn select(&mut self, peer: Option<UserId>) -> bool {
        match peer {
            Some(peer) if self.conversation(peer).is_none() => false,
            _ => {
                self.selected = peer;
                true
            }
        }
    }

    /// Hands out the next placeholder id for an optimistic message.
    pub fn next_placeholder(&mut self) -> MessageId {
        let id = MessageId::new(self.next_placeholder);
        self.next_placeholder -= 1;
        id
    }

    fn index_of(&self, peer: UserId) -> Option<usize> {
        self.conversations.iter().position(|c| c.peer() == peer)
    }

    fn conversation_mut(&mut self, peer: UserId) -> Option<&mut Conversation> {
        let index = self.index_of(peer)?;
        Arc::make_mut(&mut self.conversations).get_mut(index)
    }

    fn move_to_front(&mut self, index: usize) {
        if index > 0 {
            let list = Arc::make_mut(&mut self.conversations);
            let conversation = list.remove(index);
            list.insert(0, conversation);
        }
    }

    /// Merges one message into its conversation.
    pub fn reconcile(&mut self, message: Message) -> Reconciled {
        let local = self.local;
        let peer = message.peer_of(local);
        let from_peer = message.sender_id != local;
        let selected = self.selected == Some(peer);

        let Some(index) = self.index_of(peer) else {
            let recipient = match &message.sender {
                Some(sender) if from_peer && sender.id == peer => sender.clone(),
                _ => User::placeholder(peer),
            };
            let needs_ack = ack_candidate(&message, from_peer, selected);
            let mut conversation = Conversation::new(recipient);
            conversation.unread_count = usize::from(from_peer && !selected && !message.is_read);
            conversation.insert_ordered(message);
            conversation.refresh_preview();
            Arc::make_mut(&mut self.conversations).insert(0, conversation);
            tracing::debug!(peer = %peer, "conversation created");
            return Reconciled {
                peer,
                created: true,
                change: Change::Inserted,
                needs_ack,
            };
        };

        let current = &self.conversations[index];
        let replace_at = current
            .messages
            .iter()
            .position(|m| m.shares_temp_id(&message));
        let already_listed = match replace_at {
            // A replayed echo finds its own confirmed entry.
            Some(pos) => {
                let existing = &current.messages[pos];
                existing.is_confirmed() && existing.id == message.id
            }
            None => message.is_confirmed() && current.messages.iter().any(|m| m.id == message.id),
        };
        if already_listed {
            tracing::debug!(peer = %peer, message_id = %message.id, "duplicate message ignored");
            return Reconciled {
                peer,
                created: false,
                change: Change::Duplicate,
                needs_ack: None,
            };
        }

        let conversation = &mut Arc::make_mut(&mut self.conversations)[index];

        if let Some(pos) = replace_at {
            let existing = conversation.messages.remove(pos);
            let mut replacement = message;
            replacement.temp_id = existing.temp_id;
            if replacement.sender.is_none() {
                replacement.sender = existing.sender;
            }
            let id = replacement.id;
            if replacement.is_confirmed() {
                // A relayed copy without the token may have landed first.
                conversation.messages.retain(|m| m.id != id);
            }
            conversation.insert_ordered(replacement);
            conversation.refresh_preview();
            tracing::debug!(peer = %peer, message_id = %id, "optimistic message confirmed");
            self.move_to_front(index);
            return Reconciled {
                peer,
                created: false,
                change: Change::Replaced,
                needs_ack: None,
            };
        }

        let needs_ack = ack_candidate(&message, from_peer, selected);
        if from_peer && !selected && !message.is_read {
            conversation.unread_count += 1;
        }
        if conversation.recipient.is_placeholder() {
            if let Some(sender) = message.sender.as_ref().filter(|s| from_peer && s.id == peer) {
                conversation.recipient = sender.clone();
            }
        }
        conversation.insert_ordered(message);
        conversation.refresh_preview();
        self.move_to_front(index);
        Reconciled {
            peer,
            created: false,
            change: Change::Inserted,
            needs_ack,
        }
    }

    /// Replaces the loaded history of the conversation with `peer`.
    ///
    /// Only messages between the local user and `peer` are kept. Correlation
    /// tokens of confirmed entries carry over to the matching record. A
    /// pending send is confirmed by the earliest unclaimed record with the
    /// same author, addressee and content created no earlier than it, since
    /// REST records carry no token. Pending sends without such a record
    /// survive. The unread counter is recomputed from the merged list.
    pub fn replace_messages(&mut self, peer: UserId, history: Vec<Message>) -> bool {
        let local = self.local;
        let Some(conversation) = self.conversation_mut(peer) else {
            return false;
        };

        let mut merged: Vec<Message> = Vec::with_capacity(history.len());
        for message in history {
            let involves = (message.sender_id == local && message.receiver_id == peer)
                || (message.sender_id == peer && message.receiver_id == local);
            if involves && !merged.iter().any(|m| m.id == message.id) {
                merged.push(message);
            }
        }
        let known: Vec<Message> = conversation.messages.drain(..).collect();
        for confirmed in known.iter().filter(|m| m.is_confirmed() && m.temp_id.is_some()) {
            if let Some(record) = merged
                .iter_mut()
                .find(|h| h.id == confirmed.id && h.temp_id.is_none())
            {
                record.temp_id.clone_from(&confirmed.temp_id);
            }
        }
        merged.sort_by_key(|m| m.created_at);

        let mut pending = Vec::new();
        for entry in known.into_iter().filter(|m| !m.is_confirmed()) {
            if merged.iter().any(|h| h.shares_temp_id(&entry)) {
                continue;
            }
            let claim = merged.iter_mut().find(|h| {
                h.temp_id.is_none()
                    && h.sender_id == entry.sender_id
                    && h.receiver_id == entry.receiver_id
                    && h.content == entry.content
                    && h.created_at >= entry.created_at
            });
            match claim {
                Some(record) => {
                    record.temp_id = entry.temp_id;
                    if record.sender.is_none() {
                        record.sender = entry.sender;
                    }
                }
                None => pending.push(entry),
            }
        }
        merged.extend(pending);
        merged.sort_by_key(|m| m.created_at);

        conversation.messages = merged;
        conversation.recount_unread(local);
        conversation.refresh_preview();
        true
    }

    /// Replaces the whole conversation list with server summaries.
    ///
    /// Summaries are authoritative: conversations not listed are dropped and
    /// loaded messages are discarded. The selection survives when its peer is
    /// still listed. Optimistic entries are discarded too.
    pub fn apply_summaries(&mut self, rows: Vec<ConversationSummary>) {
        let mut list: Vec<Conversation> = Vec::with_capacity(rows.len());
        for row in rows {
            if list.iter().any(|c| c.peer() == row.recipient_id) {
                continue;
            }
            let recipient = if row.recipient_name.trim().is_empty() {
                User::placeholder(row.recipient_id)
            } else {
                User::from_display_name(row.recipient_id, &row.recipient_name)
            };
            let mut conversation = Conversation::new(recipient);
            conversation.unread_count = row.unread_count;
            conversation.status = row.status;
            conversation.last_message = row.last_message.map(|content| Preview {
                content,
                created_at: row.last_message_time,
                sender_id: None,
            });
            list.push(conversation);
        }
        if let Some(selected) = self.selected {
            if !list.iter().any(|c| c.peer() == selected) {
                self.selected = None;
            }
        }
        tracing::debug!(count = list.len(), "conversation list replaced");
        self.conversations = Arc::new(list);
    }

    /// Flips every unread received message with `peer` to read and zeroes the
    /// counter. Returns the ids that changed, oldest first.
    pub fn mark_read_local(&mut self, peer: UserId) -> Vec<MessageId> {
        let local = self.local;
        let Some(index) = self.index_of(peer) else {
            return Vec::new();
        };
        if self.conversations[index].unread_count == 0
            && !self.conversations[index]
                .messages
                .iter()
                .any(|m| m.is_received_by(local) && !m.is_read)
        {
            return Vec::new();
        }

        let conversation = &mut Arc::make_mut(&mut self.conversations)[index];
        let mut flipped = Vec::new();
        for message in &mut conversation.messages {
            if message.is_received_by(local) && !message.is_read {
                message.is_read = true;
                flipped.push(message.id);
            }
        }
        conversation.unread_count = 0;
        flipped
    }

    /// Records a presence change. Returns `false` for an unknown peer.
    pub fn set_presence(&mut self, peer: UserId, status: PresenceStatus) -> bool {
        let Some(index) = self.index_of(peer) else {
            return false;
        };
        if self.conversations[index].status == status {
            return true;
        }
        Arc::make_mut(&mut self.conversations)[index].status = status;
        true
    }

    /// Sets the typing flag. Returns `false` for an unknown peer.
    pub fn set_typing(&mut self, peer: UserId, typing: bool) -> bool {
        let Some(index) = self.index_of(peer) else {
            return false;
        };
        if self.conversations[index].is_typing != typing {
            Arc::make_mut(&mut self.conversations)[index].is_typing = typing;
        }
        true
    }

    /// Flags the optimistic message carrying `temp_id` as not sent.
    ///
    /// A message that was already confirmed is left alone.
    pub fn mark_unsent(&mut self, peer: UserId, temp_id: &TempId) -> bool {
        let Some(conversation) = self.conversation_mut(peer) else {
            return false;
        };
        match conversation
            .messages
            .iter_mut()
            .find(|m| m.temp_id.as_ref() == Some(temp_id) && !m.is_confirmed())
        {
            Some(message) => {
                message.delivery = Delivery::Unsent;
                true
            }
            None => false,
        }
    }

    /// Fills in recipients the store only knows by id, and roles it has not
    /// seen yet, from directory entries. Returns how many conversations
    /// changed.
    pub fn enrich_recipients(&mut self, directory: &[User]) -> usize {
        let needs: Vec<(usize, &User)> = self
            .conversations
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                let user = directory.iter().find(|u| u.id == c.peer())?;
                let stale = (c.recipient.is_placeholder() && !user.is_placeholder())
                    || (c.recipient.role.is_none() && user.role.is_some());
                stale.then_some((i, user))
            })
            .collect();
        if needs.is_empty() {
            return 0;
        }

        let list = Arc::make_mut(&mut self.conversations);
        for (index, user) in &needs {
            let recipient = &mut list[*index].recipient;
            if recipient.is_placeholder() {
                recipient.first_name.clone_from(&user.first_name);
                recipient.last_name.clone_from(&user.last_name);
            }
            if recipient.role.is_none() {
                recipient.role = user.role;
            }
            if recipient.avatar.is_none() {
                recipient.avatar.clone_from(&user.avatar);
            }
        }
        needs.len()
    }

    /// Ensures a conversation with `peer` exists. Returns `true` when it had
    /// to be created.
    pub fn start_conversation(&mut self, peer: User) -> bool {
        if self.index_of(peer.id).is_some() {
            return false;
        }
        Arc::make_mut(&mut self.conversations).insert(0, Conversation::new(peer));
        true
    }
}

fn ack_candidate(message: &Message, from_peer: bool, selected: bool) -> Option<MessageId> {
    (from_peer && selected && !message.is_read && message.is_confirmed()).then_some(message.id)
}
