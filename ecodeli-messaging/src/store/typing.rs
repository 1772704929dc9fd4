//! Self-expiring typing indicators.
//!
//! Each typing peer gets one timer task. A refresh aborts the running timer
//! and starts a new one under a fresh generation number, so at most one live
//! timer exists per peer. When a timer fires it reports a [`TypingExpiry`]
//! through the sink; the owner passes it back to [`TypingTracker::expire`],
//! which ignores expiries from superseded generations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use ecodeli_proto::user::UserId;

/// Default time a typing indicator stays up without a refresh.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// A typing timer that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingExpiry {
    /// The peer whose indicator expired.
    pub peer: UserId,
    /// Generation of the timer that fired.
    pub generation: u64,
}

type Sink = Arc<dyn Fn(TypingExpiry) + Send + Sync>;

/// Per-peer typing timers.
pub struct TypingTracker {
    timeout: Duration,
    timers: HashMap<UserId, (u64, JoinHandle<()>)>,
    next_generation: u64,
    sink: Sink,
}

impl TypingTracker {
    /// Creates a tracker whose timers report into `sink`.
    pub fn new<F>(timeout: Duration, sink: F) -> Self
    where
        F: Fn(TypingExpiry) + Send + Sync + 'static,
    {
        Self {
            timeout,
            timers: HashMap::new(),
            next_generation: 0,
            sink: Arc::new(sink),
        }
    }

    /// Marks `peer` as typing, restarting its timer.
    ///
    /// Returns `true` when the peer was not typing before.
    pub fn refresh(&mut self, peer: UserId) -> bool {
        self.next_generation += 1;
        let generation = self.next_generation;
        let sink = Arc::clone(&self.sink);
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            sink(TypingExpiry { peer, generation });
        });

        match self.timers.insert(peer, (generation, handle)) {
            Some((_, previous)) => {
                previous.abort();
                false
            }
            None => true,
        }
    }

    /// Applies a fired timer. Returns `true` when `expiry.peer` stopped
    /// typing; stale expiries return `false`.
    pub fn expire(&mut self, expiry: TypingExpiry) -> bool {
        match self.timers.get(&expiry.peer) {
            Some((generation, _)) if *generation == expiry.generation => {
                self.timers.remove(&expiry.peer);
                true
            }
            _ => false,
        }
    }

    /// Whether `peer` is currently typing.
    #[must_use]
    pub fn is_typing(&self, peer: UserId) -> bool {
        self.timers.contains_key(&peer)
    }

    /// Number of live timers.
    #[must_use]
    pub fn active(&self) -> usize {
        self.timers.len()
    }

    /// Cancels every timer.
    pub fn clear(&mut self) {
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for TypingTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypingTracker")
            .field("timeout", &self.timeout)
            .field("typing", &self.timers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
