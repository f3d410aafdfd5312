use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{MESSAGES_COLLECTION, USERS_COLLECTION};

// Authenticated user identity, as issued by the auth provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier assigned by the remote store when a document is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier, for stores that generate their own keys.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a message in the local log.
///
/// Authoritative messages carry the id the remote store assigned. Optimistic
/// echoes get a locally generated id until the confirmed record replaces them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageId {
    Remote(DocumentId),
    Local(Uuid),
}

impl MessageId {
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn as_remote(&self) -> Option<&DocumentId> {
        match self {
            Self::Remote(id) => Some(id),
            Self::Local(_) => None,
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "local:{id}"),
        }
    }
}

/// Server-side send time of a message.
///
/// Variant order matters: the derived `Ord` places every assigned timestamp
/// before `Pending`, so optimistic echoes sort at the tail of the log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SentAt {
    At(DateTime<Utc>),
    Pending,
}

impl SentAt {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::At(ts) => Some(*ts),
            Self::Pending => None,
        }
    }
}

impl From<Option<DateTime<Utc>>> for SentAt {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map(Self::At).unwrap_or(Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Collection {
    Messages,
    Users,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => MESSAGES_COLLECTION,
            Self::Users => USERS_COLLECTION,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            MESSAGES_COLLECTION => Some(Self::Messages),
            USERS_COLLECTION => Some(Self::Users),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a subscription listens to. Two topics are equal iff kind and
/// parameters match, which is what keeps one live handle per topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    ChannelMessages(ChannelId),
    Presence,
}

impl Topic {
    pub fn channel(&self) -> Option<&ChannelId> {
        match self {
            Self::ChannelMessages(id) => Some(id),
            Self::Presence => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelMessages(id) => write!(f, "messages:{id}"),
            Self::Presence => f.write_str("presence"),
        }
    }
}
