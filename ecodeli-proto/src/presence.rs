//! Presence status for peer online/away/offline tracking.

use serde::{Deserialize, Serialize};

/// Presence status of a peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Peer has an open session.
    Online,
    /// Peer is connected but idle.
    Away,
    /// Peer has no open session.
    #[default]
    Offline,
}

impl PresenceStatus {
    /// Parses a status tag, treating anything unrecognized as offline.
    #[must_use]
    pub fn parse_lenient(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "online" => Self::Online,
            "away" | "idle" => Self::Away,
            _ => Self::Offline,
        }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Away => write!(f, "away"),
            Self::Offline => write!(f, "offline"),
        }
    }
}
