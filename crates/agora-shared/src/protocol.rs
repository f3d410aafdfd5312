use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{SERVER_TIMESTAMP, STATUS_OFFLINE, STATUS_ONLINE};
use crate::error::DecodeError;
use crate::models::{LocalProfile, Message, PresenceEntry};
use crate::remote::Document;
use crate::types::{ChannelId, MessageId, UserId};

/// Body of a document in the `messages` collection, as read back from the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub channel: ChannelId,
    pub author_id: UserId,
    pub author_display_name: String,
    #[serde(default)]
    pub author_avatar_url: Option<String>,
    pub text: String,
    /// `None` while the store has not resolved its server timestamp yet
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

/// Presence status carried in the `status` field of a user document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => STATUS_ONLINE,
            Self::Offline => STATUS_OFFLINE,
        }
    }
}

/// Body of a document in the `users` collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub status: PresenceStatus,
}

impl PresenceRecord {
    pub fn for_profile(profile: &LocalProfile, status: PresenceStatus) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            display_name: profile.display_name.clone(),
            email: profile.email.clone(),
            avatar_url: profile.avatar_url.clone(),
            status,
        }
    }

    pub fn to_fields(&self) -> Value {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Fields written when sending a message. The send time is left to the store.
pub fn outgoing_message_fields(message: &Message) -> Value {
    serde_json::json!({
        "channel": message.channel,
        "authorId": message.author_id,
        "authorDisplayName": message.author_display_name,
        "authorAvatarUrl": message.author_avatar_url,
        "text": message.text,
        "sentAt": SERVER_TIMESTAMP,
    })
}

/// Decode a `messages` document into a confirmed [`Message`].
pub fn decode_message(doc: &Document) -> Result<Message, DecodeError> {
    let record: MessageRecord =
        serde_json::from_value(doc.fields.clone()).map_err(|source| DecodeError::Malformed {
            id: doc.id.to_string(),
            source,
        })?;

    let text = record.text.trim();
    if text.is_empty() {
        return Err(DecodeError::EmptyText {
            id: doc.id.to_string(),
        });
    }

    Ok(Message {
        id: MessageId::Remote(doc.id.clone()),
        channel: record.channel,
        author_id: record.author_id,
        author_display_name: record.author_display_name,
        author_avatar_url: record.author_avatar_url,
        text: text.to_string(),
        sent_at: record.sent_at.into(),
    })
}

/// Decode a `users` document into a [`PresenceEntry`].
pub fn decode_presence(doc: &Document) -> Result<PresenceEntry, DecodeError> {
    let record: PresenceRecord =
        serde_json::from_value(doc.fields.clone()).map_err(|source| DecodeError::Malformed {
            id: doc.id.to_string(),
            source,
        })?;

    Ok(PresenceEntry {
        user_id: record.user_id,
        display_name: record.display_name,
        email: record.email,
        avatar_url: record.avatar_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentId, SentAt};
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> Document {
        Document::new(DocumentId::new(id), fields)
    }

    #[test]
    fn test_decode_message() {
        let d = doc(
            "m1",
            json!({
                "channel": "ideas",
                "authorId": "u1",
                "authorDisplayName": "Ada",
                "authorAvatarUrl": null,
                "text": "  hello  ",
                "sentAt": "2024-05-01T10:00:00Z",
            }),
        );
        let msg = decode_message(&d).unwrap();
        assert_eq!(msg.id, MessageId::Remote(DocumentId::new("m1")));
        assert_eq!(msg.channel, ChannelId::new("ideas"));
        assert_eq!(msg.text, "hello");
        assert!(!msg.sent_at.is_pending());
    }

    #[test]
    fn test_decode_message_without_time_is_pending() {
        let d = doc(
            "m2",
            json!({
                "channel": "ideas",
                "authorId": "u1",
                "authorDisplayName": "Ada",
                "text": "hi",
            }),
        );
        assert_eq!(decode_message(&d).unwrap().sent_at, SentAt::Pending);
    }

    #[test]
    fn test_decode_message_rejects_missing_fields() {
        let d = doc("m3", json!({"channel": "ideas"}));
        assert!(matches!(
            decode_message(&d),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_message_rejects_blank_text() {
        let d = doc(
            "m4",
            json!({
                "channel": "ideas",
                "authorId": "u1",
                "authorDisplayName": "Ada",
                "text": "   ",
                "sentAt": "2024-05-01T10:00:00Z",
            }),
        );
        assert!(matches!(
            decode_message(&d),
            Err(DecodeError::EmptyText { .. })
        ));
    }

    #[test]
    fn test_outgoing_fields_carry_server_timestamp() {
        let profile = LocalProfile::new("u1", "Ada", "ada@example.com");
        let msg = Message::optimistic(ChannelId::new("ideas"), &profile, "hi".into());
        let fields = outgoing_message_fields(&msg);
        assert_eq!(fields["sentAt"], json!(SERVER_TIMESTAMP));
        assert_eq!(fields["channel"], json!("ideas"));
        assert_eq!(fields["authorId"], json!("u1"));
    }

    #[test]
    fn test_presence_record_fields() {
        let profile = LocalProfile::new("u1", "Ada", "ada@example.com").with_avatar("a.png");
        let fields = PresenceRecord::for_profile(&profile, PresenceStatus::Online).to_fields();
        assert_eq!(fields["status"], json!("online"));
        assert_eq!(fields["userId"], json!("u1"));

        let entry = decode_presence(&doc("u1", fields)).unwrap();
        assert_eq!(entry.display_name, "Ada");
        assert_eq!(entry.avatar_url.as_deref(), Some("a.png"));
    }
}
