//! User identity and directory entries.

use serde::{Deserialize, Serialize};

/// Numeric identifier of a marketplace user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wraps a raw backend user id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marketplace role attached to a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Customer ordering deliveries or services.
    Client,
    /// Courier carrying packages.
    Deliveryman,
    /// Provider of on-site services.
    ServiceProvider,
    /// Merchant shipping goods through the platform.
    Shopkeeper,
    /// Back-office administrator.
    Admin,
}

impl Role {
    /// Parses a role tag as the backend spells it.
    ///
    /// Accepts `snake_case`, `camelCase`, and kebab-case spellings
    /// case-insensitively, plus the short aliases the backend uses in a few
    /// endpoints (`delivery`, `provider`, `merchant`). Unknown tags yield
    /// `None`.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let normalized: String = tag
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "client" | "customer" => Some(Self::Client),
            "deliveryman" | "delivery" | "courier" => Some(Self::Deliveryman),
            "serviceprovider" | "provider" | "service" => Some(Self::ServiceProvider),
            "shopkeeper" | "merchant" | "shop" => Some(Self::Shopkeeper),
            "admin" | "administrator" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Deliveryman => write!(f, "deliveryman"),
            Self::ServiceProvider => write!(f, "service_provider"),
            Self::Shopkeeper => write!(f, "shopkeeper"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// A peer reference as fetched from the backend.
///
/// Immutable once fetched; a reload replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Backend user id.
    pub id: UserId,
    /// Given name. Empty for placeholders.
    pub first_name: String,
    /// Family name. Empty for placeholders.
    pub last_name: String,
    /// Marketplace role, when the backend reports one.
    pub role: Option<Role>,
    /// Avatar URL or asset key.
    pub avatar: Option<String>,
}

impl User {
    /// Creates a user with the given name parts and no role or avatar.
    pub fn new(id: UserId, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            role: None,
            avatar: None,
        }
    }

    /// Builder-style role setter.
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// A nameless stand-in for a peer whose details are not known yet.
    #[must_use]
    pub const fn placeholder(id: UserId) -> Self {
        Self {
            id,
            first_name: String::new(),
            last_name: String::new(),
            role: None,
            avatar: None,
        }
    }

    /// Whether this user carries no name information.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.first_name.is_empty() && self.last_name.is_empty()
    }

    /// Splits a single display name into first and last name parts.
    ///
    /// The first whitespace-separated word becomes the first name; the rest
    /// becomes the last name.
    pub fn from_display_name(id: UserId, name: &str) -> Self {
        let name = name.trim();
        match name.split_once(char::is_whitespace) {
            Some((first, rest)) => Self::new(id, first, rest.trim()),
            None => Self::new(id, name, ""),
        }
    }

    /// Full display name, falling back to `User #<id>` for placeholders.
    #[must_use]
    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (true, true) => format!("User #{}", self.id),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (false, false) => format!("{} {}", self.first_name, self.last_name),
        }
    }
}
