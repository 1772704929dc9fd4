//! Conversation controller.
//!
//! [`Messenger`] is the single owner of the [`ConversationStore`]. Transport
//! callbacks, REST completions, and typing timers never touch the store
//! directly: they are forwarded as [`SessionEvent`]s into one channel, and
//! the task that owns the messenger applies them one at a time through
//! [`Messenger::handle_event`].
//!
//! ```text
//! Transport ─┐
//! REST tasks ├──▶ mpsc<SessionEvent> ──▶ Messenger::handle_event ──▶ ConversationStore
//! Timers ────┘
//! ```

pub mod filter;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use ecodeli_proto::message::{Message, MessageId, TempId};
use ecodeli_proto::user::{User, UserId};

use crate::api::{ApiError, Backend};
use crate::store::typing::DEFAULT_TYPING_TIMEOUT;
use crate::store::{Conversation, ConversationStore, TypingExpiry, TypingTracker};
use crate::transport::{
    ConnectionState, OutgoingMessage, PresenceUpdate, Registry, Subscription, Transport,
    TransportError,
};

pub use filter::{RoleFilter, filter_conversations};

/// Everything that can change the messenger's state, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    /// A message arrived on the transport (peer message or self echo).
    Message(Message),
    /// A peer is typing.
    Typing(UserId),
    /// A typing timer fired.
    TypingExpired(TypingExpiry),
    /// A peer's presence changed.
    Presence(PresenceUpdate),
    /// The transport changed state.
    Connection(ConnectionState),
    /// The transport reported an error.
    Failure(TransportError),
    /// The user directory fetch finished.
    DirectoryLoaded(Result<Vec<User>, ApiError>),
    /// The post-reconnect inbox fetch finished.
    InboxResynced(Result<Vec<Message>, ApiError>),
    /// A REST read acknowledgement finished.
    ReadAcknowledged {
        /// The acknowledged message.
        message_id: MessageId,
        /// Outcome of the call.
        result: Result<(), ApiError>,
    },
}

/// Behavior knobs for [`Messenger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessengerConfig {
    /// How long a typing indicator stays up without a refresh.
    pub typing_timeout: Duration,
    /// Re-fetch the inbox after an automatic reconnect.
    pub resync_on_reconnect: bool,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            resync_on_reconnect: true,
        }
    }
}

#[derive(Debug)]
enum Directory {
    NotLoaded,
    Loading,
    Loaded(Vec<User>),
}

/// Orchestrates transport, REST backend, and conversation store for one
/// logged-in user.
pub struct Messenger<T: Transport + 'static, B: Backend + 'static> {
    me: User,
    transport: Arc<T>,
    backend: Arc<B>,
    config: MessengerConfig,
    store: ConversationStore,
    typing: TypingTracker,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    subscriptions: Vec<Subscription>,
    directory: Directory,
    /// Messages whose read acknowledgement was already issued.
    acknowledged: HashSet<MessageId>,
    connected: bool,
    ever_connected: bool,
}

fn forward<E: 'static>(
    registry: &Registry<E>,
    tx: &mpsc::UnboundedSender<SessionEvent>,
    wrap: fn(&E) -> SessionEvent,
) -> Subscription {
    let tx = tx.clone();
    registry.subscribe(move |event| {
        let _ = tx.send(wrap(event));
    })
}

impl<T: Transport + 'static, B: Backend + 'static> Messenger<T, B> {
    /// Creates a messenger for `me` and subscribes to every transport
    /// registry. Call [`start`](Self::start) to open the session.
    pub fn new(me: User, transport: Arc<T>, backend: Arc<B>, config: MessengerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let hub = transport.events();
        let subscriptions = vec![
            forward(&hub.messages, &events_tx, |m| SessionEvent::Message(m.clone())),
            forward(&hub.typing, &events_tx, |peer| SessionEvent::Typing(*peer)),
            forward(&hub.presence, &events_tx, |u| SessionEvent::Presence(*u)),
            forward(&hub.errors, &events_tx, |e| SessionEvent::Failure(e.clone())),
            forward(&hub.connection, &events_tx, |s| SessionEvent::Connection(*s)),
        ];

        let timer_tx = events_tx.clone();
        let typing = TypingTracker::new(config.typing_timeout, move |expiry| {
            let _ = timer_tx.send(SessionEvent::TypingExpired(expiry));
        });

        Self {
            store: ConversationStore::new(me.id),
            me,
            transport,
            backend,
            config,
            typing,
            events_tx,
            events_rx,
            subscriptions,
            directory: Directory::NotLoaded,
            acknowledged: HashSet::new(),
            connected: false,
            ever_connected: false,
        }
    }

    /// The logged-in user.
    #[must_use]
    pub const fn me(&self) -> &User {
        &self.me
    }

    /// Opens the transport session as the logged-in user.
    pub fn start(&self) {
        self.transport.connect(self.me.id);
    }

    /// Whether the transport last reported itself connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// The current conversation list, most recent activity first.
    #[must_use]
    pub fn conversations(&self) -> Arc<Vec<Conversation>> {
        self.store.snapshot()
    }

    /// The conversation with `peer`, if any.
    #[must_use]
    pub fn conversation(&self, peer: UserId) -> Option<&Conversation> {
        self.store.conversation(peer)
    }

    /// The selected conversation's peer.
    #[must_use]
    pub const fn selected(&self) -> Option<UserId> {
        self.store.selected()
    }

    /// The loaded user directory; empty until
    /// [`load_available_users`](Self::load_available_users) completes.
    #[must_use]
    pub fn directory(&self) -> &[User] {
        match &self.directory {
            Directory::Loaded(users) => users,
            Directory::NotLoaded | Directory::Loading => &[],
        }
    }

    /// Replaces the conversation list with the server's summaries.
    ///
    /// Loaded messages are discarded. A selection that survives the reload
    /// has its history fetched again and is marked read.
    ///
    /// # Errors
    ///
    /// Returns the backend error; the store is left untouched in that case.
    pub async fn load_conversations(&mut self) -> Result<usize, ApiError> {
        let rows = self.backend.fetch_conversations().await?;
        self.store.apply_summaries(rows);
        if let Directory::Loaded(users) = &self.directory {
            self.store.enrich_recipients(users);
        }
        tracing::info!(count = self.store.len(), "conversations loaded");
        if let Some(selected) = self.store.selected() {
            self.select_conversation(Some(selected)).await;
        }
        Ok(self.store.len())
    }

    /// Waits for the next event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Applies every event already queued. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Applies one event to the store.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message(message) => self.on_message(message),
            SessionEvent::Typing(peer) => {
                self.typing.refresh(peer);
                self.store.set_typing(peer, true);
            }
            SessionEvent::TypingExpired(expiry) => {
                if self.typing.expire(expiry) {
                    self.store.set_typing(expiry.peer, false);
                }
            }
            SessionEvent::Presence(update) => {
                self.store.set_presence(update.user_id, update.status);
            }
            SessionEvent::Connection(state) => self.on_connection(state),
            SessionEvent::Failure(error) => {
                tracing::warn!(error = %error, "transport reported an error");
            }
            SessionEvent::DirectoryLoaded(Ok(users)) => {
                let enriched = self.store.enrich_recipients(&users);
                tracing::info!(count = users.len(), enriched, "user directory loaded");
                self.directory = Directory::Loaded(users);
            }
            SessionEvent::DirectoryLoaded(Err(error)) => {
                tracing::warn!(error = %error, "could not load user directory");
                self.directory = Directory::NotLoaded;
            }
            SessionEvent::InboxResynced(Ok(inbox)) => self.apply_resync(inbox),
            SessionEvent::InboxResynced(Err(error)) => {
                tracing::warn!(error = %error, "inbox resync failed");
            }
            SessionEvent::ReadAcknowledged { message_id, result } => match result {
                Ok(()) => tracing::debug!(message_id = %message_id, "read acknowledged"),
                Err(error) => {
                    tracing::warn!(message_id = %message_id, error = %error, "read acknowledgement failed");
                }
            },
        }
    }

    fn on_message(&mut self, message: Message) {
        let outcome = self.store.reconcile(message);
        if outcome.created {
            if let Directory::Loaded(users) = &self.directory {
                self.store.enrich_recipients(users);
            }
        }
        if outcome.needs_ack.is_some() {
            self.mark_as_read(outcome.peer);
        }
    }

    fn on_connection(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                let reconnected = self.ever_connected;
                self.connected = true;
                self.ever_connected = true;
                if reconnected && self.config.resync_on_reconnect {
                    self.spawn_resync();
                }
            }
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                self.connected = false;
            }
        }
    }

    fn spawn_resync(&self) {
        tracing::info!("reconnected, resyncing inbox");
        let backend = Arc::clone(&self.backend);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = backend.fetch_inbox().await;
            let _ = tx.send(SessionEvent::InboxResynced(result));
        });
    }

    /// Merges a post-reconnect inbox: known conversations take the full
    /// merge, unknown peers go through reconciliation.
    fn apply_resync(&mut self, inbox: Vec<Message>) {
        let local = self.me.id;
        let mut peers: Vec<UserId> = Vec::new();
        for message in &inbox {
            let peer = message.peer_of(local);
            if !peers.contains(&peer) {
                peers.push(peer);
            }
        }

        let mut fresh = Vec::new();
        for peer in peers {
            if self.store.conversation(peer).is_some() {
                let history: Vec<Message> = inbox
                    .iter()
                    .filter(|m| m.peer_of(local) == peer)
                    .cloned()
                    .collect();
                self.store.replace_messages(peer, history);
            } else {
                fresh.push(peer);
            }
        }
        for message in inbox {
            if fresh.contains(&message.peer_of(local)) {
                self.on_message(message);
            }
        }

        if let Some(selected) = self.store.selected() {
            self.mark_as_read(selected);
        }
        tracing::info!(conversations = self.store.len(), "inbox resynced");
    }

    /// Sends `content` to `receiver`.
    ///
    /// Blank content is ignored. The message is shown optimistically right
    /// away; if the transport is not connected it is flagged unsent. Returns
    /// the correlation token of the new message.
    pub fn send_message(&mut self, receiver: UserId, content: &str) -> Option<TempId> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }

        let temp_id = TempId::generate();
        let mut message = Message::optimistic(
            self.store.next_placeholder(),
            temp_id.clone(),
            self.me.id,
            receiver,
            content,
            Utc::now(),
        );
        message.sender = Some(self.me.clone());
        self.store.reconcile(message);

        let dispatched = self.transport.send_message(OutgoingMessage {
            receiver_id: receiver,
            content: content.to_string(),
            temp_id: temp_id.clone(),
        });
        if !dispatched {
            self.store.mark_unsent(receiver, &temp_id);
        }
        Some(temp_id)
    }

    /// Tells `peer` the local user is typing.
    pub fn send_typing(&self, peer: UserId) -> bool {
        self.transport.send_typing(peer)
    }

    /// Marks every unread message from `peer` as read.
    ///
    /// The local state flips immediately. Each message is then acknowledged
    /// over REST and over the transport, concurrently and at most once;
    /// failures are logged when their [`SessionEvent::ReadAcknowledged`]
    /// is handled. Returns how many messages flipped.
    pub fn mark_as_read(&mut self, peer: UserId) -> usize {
        let flipped = self.store.mark_read_local(peer);
        for &message_id in &flipped {
            if message_id.is_placeholder() || !self.acknowledged.insert(message_id) {
                continue;
            }
            self.transport.mark_as_read(message_id);

            let backend = Arc::clone(&self.backend);
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                let result = backend.mark_read(message_id).await;
                let _ = tx.send(SessionEvent::ReadAcknowledged { message_id, result });
            });
        }
        if !flipped.is_empty() {
            tracing::debug!(peer = %peer, count = flipped.len(), "marked conversation read");
        }
        flipped.len()
    }

    /// Selects the conversation with `peer`, or clears the selection.
    ///
    /// A conversation whose messages are not loaded yet gets its history
    /// fetched first. The conversation is then marked read. Returns `false`
    /// for an unknown peer.
    pub async fn select_conversation(&mut self, peer: Option<UserId>) -> bool {
        if !self.store.select(peer) {
            tracing::debug!(?peer, "cannot select unknown conversation");
            return false;
        }
        let Some(peer) = peer else {
            return true;
        };

        let needs_history = self
            .store
            .conversation(peer)
            .is_some_and(|c| c.messages.is_empty());
        if needs_history {
            match self.backend.fetch_inbox().await {
                Ok(inbox) => {
                    self.store.replace_messages(peer, inbox);
                }
                Err(error) => {
                    tracing::warn!(peer = %peer, error = %error, "could not load history");
                }
            }
        }
        self.mark_as_read(peer);
        true
    }

    /// Projects the conversation list through `filter` and `query`.
    #[must_use]
    pub fn filtered_conversations(&self, filter: RoleFilter, query: &str) -> Vec<Conversation> {
        filter_conversations(&self.store.snapshot(), self.me.role, filter, query)
    }

    /// The role filters offered to the logged-in user.
    #[must_use]
    pub const fn allowed_filters(&self) -> &'static [RoleFilter] {
        RoleFilter::allowed_for(self.me.role)
    }

    /// Starts fetching the user directory. No-op while a fetch is in flight
    /// or after it succeeded; returns whether a fetch started.
    pub fn load_available_users(&mut self) -> bool {
        if !matches!(self.directory, Directory::NotLoaded) {
            return false;
        }
        self.directory = Directory::Loading;
        let backend = Arc::clone(&self.backend);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = backend.fetch_available_users().await;
            let _ = tx.send(SessionEvent::DirectoryLoaded(result));
        });
        true
    }

    /// Opens a conversation with `peer`, creating an empty one if needed.
    pub async fn start_conversation(&mut self, peer: User) {
        let peer_id = peer.id;
        if peer_id == self.me.id {
            tracing::debug!("refusing to start a conversation with oneself");
            return;
        }
        if self.store.start_conversation(peer) {
            self.store.select(Some(peer_id));
            tracing::debug!(peer = %peer_id, "started new conversation");
        } else {
            self.select_conversation(Some(peer_id)).await;
        }
    }

    /// Releases every subscription, cancels typing timers, and closes the
    /// transport. In-flight REST calls are left to finish.
    pub fn shutdown(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.typing.clear();
        self.transport.disconnect();
        self.connected = false;
        tracing::info!("messenger shut down");
    }
}
