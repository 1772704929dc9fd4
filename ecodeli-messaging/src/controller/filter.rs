//! Role filters and free-text search over conversations.

use std::fmt;

use ecodeli_proto::user::{Role, User};

use crate::store::Conversation;

/// Peer-role filter for the conversation list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RoleFilter {
    /// Every conversation.
    #[default]
    All,
    /// Peers who are marketplace clients.
    Client,
    /// Peers who are delivery people.
    Delivery,
    /// Peers who are service providers.
    Service,
    /// Peers who are shopkeepers.
    Shopkeeper,
}

const EVERY: &[RoleFilter] = &[
    RoleFilter::All,
    RoleFilter::Client,
    RoleFilter::Delivery,
    RoleFilter::Service,
    RoleFilter::Shopkeeper,
];

impl RoleFilter {
    /// Parses a filter name (`all`, `client`, `delivery`, `service`,
    /// `shopkeeper`), case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "client" | "clients" => Some(Self::Client),
            "delivery" | "deliveryman" => Some(Self::Delivery),
            "service" | "service_provider" | "provider" => Some(Self::Service),
            "shopkeeper" | "merchant" => Some(Self::Shopkeeper),
            _ => None,
        }
    }

    /// The filters offered to a user with `role`.
    #[must_use]
    pub const fn allowed_for(role: Option<Role>) -> &'static [Self] {
        match role {
            Some(Role::Admin) => EVERY,
            Some(Role::Client) => &[Self::All, Self::Delivery, Self::Service],
            Some(Role::Shopkeeper) => &[Self::All, Self::Delivery],
            Some(Role::Deliveryman | Role::ServiceProvider) | None => &[Self::All],
        }
    }

    /// Whether `peer` passes this filter.
    #[must_use]
    pub fn matches(self, peer: &User) -> bool {
        match self {
            Self::All => true,
            Self::Client => peer.role == Some(Role::Client),
            Self::Delivery => peer.role == Some(Role::Deliveryman),
            Self::Service => peer.role == Some(Role::ServiceProvider),
            Self::Shopkeeper => peer.role == Some(Role::Shopkeeper),
        }
    }
}

impl fmt::Display for RoleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Client => "client",
            Self::Delivery => "delivery",
            Self::Service => "service",
            Self::Shopkeeper => "shopkeeper",
        })
    }
}

/// Projects `conversations` through a role filter and a search query.
///
/// A filter not offered to `local_role` behaves as [`RoleFilter::All`]. The
/// query matches case-insensitively against the peer's full name or the last
/// message text; an empty query matches everything. Order is preserved.
#[must_use]
pub fn filter_conversations(
    conversations: &[Conversation],
    local_role: Option<Role>,
    filter: RoleFilter,
    query: &str,
) -> Vec<Conversation> {
    let filter = if RoleFilter::allowed_for(local_role).contains(&filter) {
        filter
    } else {
        RoleFilter::All
    };
    let needle = query.trim().to_lowercase();

    conversations
        .iter()
        .filter(|c| filter.matches(&c.recipient))
        .filter(|c| {
            needle.is_empty()
                || c.recipient.full_name().to_lowercase().contains(&needle)
                || c.last_message
                    .as_ref()
                    .is_some_and(|p| p.content.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}
