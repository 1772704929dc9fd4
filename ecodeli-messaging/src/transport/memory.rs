//! In-process transport for tests and offline demos.
//!
//! [`MemoryTransport`] records every outbound [`ClientEvent`] and lets the
//! test inject server events and connection drops directly.

use parking_lot::Mutex;

use ecodeli_proto::events::{ClientEvent, ServerEvent};
use ecodeli_proto::user::UserId;

use super::{ConnectionState, EventHub, Transport, TransportError};

/// A fake [`Transport`] that never touches the network.
#[derive(Default)]
pub struct MemoryTransport {
    hub: EventHub,
    state: Mutex<ConnectionState>,
    user: Mutex<Option<UserId>>,
    sent: Mutex<Vec<ClientEvent>>,
    connects: Mutex<usize>,
}

impl MemoryTransport {
    /// Creates a disconnected transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a server event to subscribers as if it arrived on the wire.
    pub fn deliver(&self, event: ServerEvent) {
        self.hub.dispatch(event);
    }

    /// Reports a transport error to subscribers.
    pub fn fail(&self, error: TransportError) {
        self.hub.errors.emit(&error);
    }

    /// Simulates the socket dropping.
    pub fn drop_connection(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    /// Simulates a successful automatic reconnect, re-authenticating as the
    /// last connected user.
    pub fn restore_connection(&self) {
        let user = *self.user.lock();
        if let Some(user_id) = user {
            self.sent.lock().push(ClientEvent::Authenticate { user_id });
            self.set_state(ConnectionState::Connected);
        }
    }

    /// Every event dispatched so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().clone()
    }

    /// Drains the recorded events.
    pub fn take_sent(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// How many times `connect` actually opened the session.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        *self.connects.lock()
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, next) != next
        };
        if changed {
            self.hub.connection.emit(&next);
        }
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, user_id: UserId) {
        if self.state() != ConnectionState::Disconnected {
            return;
        }
        *self.user.lock() = Some(user_id);
        *self.connects.lock() += 1;
        self.set_state(ConnectionState::Connecting);
        self.sent.lock().push(ClientEvent::Authenticate { user_id });
        self.set_state(ConnectionState::Connected);
    }

    fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn events(&self) -> &EventHub {
        &self.hub
    }

    fn dispatch(&self, event: ClientEvent) -> bool {
        if !self.is_connected() {
            tracing::warn!("memory transport not connected, dropping outbound event");
            return false;
        }
        self.sent.lock().push(event);
        true
    }
}
