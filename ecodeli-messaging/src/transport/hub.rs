//! Typed publish/subscribe registries for transport events.
//!
//! Each event kind has its own [`Registry`]. Subscribing returns a
//! [`Subscription`] token; dropping the token (or calling
//! [`Subscription::unsubscribe`]) removes the callback. Any number of
//! independent subscribers may listen to the same registry.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use ecodeli_proto::events::ServerEvent;
use ecodeli_proto::message::Message;
use ecodeli_proto::presence::PresenceStatus;
use ecodeli_proto::user::UserId;

use super::{ConnectionState, TransportError};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
}

/// Subscriber list for one event kind.
pub struct Registry<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Registry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    /// Registers `callback` and returns the token that keeps it registered.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.callbacks.push((id, Arc::new(callback)));
            id
        };
        let weak: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    slots.lock().callbacks.retain(|(slot_id, _)| *slot_id != id);
                }
            })),
        }
    }

    /// Invokes every registered callback with `event`.
    ///
    /// Callbacks run outside the registry lock, so a callback may subscribe
    /// or unsubscribe without deadlocking.
    pub fn emit(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = self
            .slots
            .lock()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().callbacks.len()
    }

    /// Whether nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unsubscribe token returned by [`Registry::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Removes the callback from its registry.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A peer presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// The peer whose status changed.
    pub user_id: UserId,
    /// The new status.
    pub status: PresenceStatus,
}

/// The five subscriber registries a transport exposes.
#[derive(Default)]
pub struct EventHub {
    /// Peer messages and echoes of self-sent messages.
    pub messages: Registry<Message>,
    /// Peers typing to the local user.
    pub typing: Registry<UserId>,
    /// Peer presence changes.
    pub presence: Registry<PresenceUpdate>,
    /// Transport and server errors.
    pub errors: Registry<TransportError>,
    /// Connection state transitions.
    pub connection: Registry<ConnectionState>,
}

impl EventHub {
    /// Creates a hub with empty registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes a decoded server event to the matching registry.
    pub fn dispatch(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(message) | ServerEvent::MessageSent(message) => {
                self.messages.emit(&message);
            }
            ServerEvent::UserTyping { user_id } => self.typing.emit(&user_id),
            ServerEvent::UserStatusChange { user_id, status } => {
                self.presence.emit(&PresenceUpdate { user_id, status });
            }
            ServerEvent::Error { message } => {
                tracing::warn!(error = %message, "server reported an error");
                self.errors.emit(&TransportError::Server(message));
            }
        }
    }
}
