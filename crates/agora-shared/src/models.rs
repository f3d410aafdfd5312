//! Domain records held by the client read models.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a presentation layer over IPC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, MessageId, SentAt, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Immutable once the remote store has confirmed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub channel: ChannelId,
    pub author_id: UserId,
    /// Captured at send time; not updated if the author later changes profile.
    pub author_display_name: String,
    pub author_avatar_url: Option<String>,
    /// Trimmed, non-empty, untrusted text.
    pub text: String,
    pub sent_at: SentAt,
}

impl Message {
    /// Build an optimistic echo for text the local user is about to send.
    pub fn optimistic(channel: ChannelId, author: &LocalProfile, text: String) -> Self {
        Self {
            id: MessageId::local(),
            channel,
            author_id: author.user_id.clone(),
            author_display_name: author.display_name.clone(),
            author_avatar_url: author.avatar_url.clone(),
            text,
            sent_at: SentAt::Pending,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        !self.id.is_local() && !self.sent_at.is_pending()
    }

    pub fn sent_time(&self) -> Option<DateTime<Utc>> {
        self.sent_at.timestamp()
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// One user currently reported online by the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Local profile
// ---------------------------------------------------------------------------

/// The signed-in user, as produced by a successful authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalProfile {
    pub user_id: UserId,
    pub display_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

impl LocalProfile {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            user_id: UserId::new(user_id),
            display_name: display_name.into(),
            email: email.into(),
            avatar_url: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}
