use thiserror::Error;

use agora_shared::types::{MessageId, Topic, UserId};
use agora_shared::{RemoteError, ValidationError};

/// Every failure a [`crate::session::ChatSession`] reports to its caller.
///
/// Superseded subscription deliveries are not in here: they are dropped by
/// the generation check and never surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Already signed in as {0}")]
    AlreadySignedIn(UserId),

    /// Local input problem; nothing was sent.
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// The store did not acknowledge a message write. The echo stays in the
    /// log marked as failed and can be resent.
    #[error("Message {local_id} was not delivered: {source}")]
    WriteNotAcknowledged {
        local_id: MessageId,
        #[source]
        source: RemoteError,
    },

    /// Establishing a subscription failed. No automatic retry happens.
    #[error("Could not subscribe to {topic}: {source}")]
    Subscribe {
        topic: Topic,
        #[source]
        source: RemoteError,
    },

    #[error("No failed message with id {0}")]
    UnknownMessage(MessageId),
}

impl SessionError {
    /// Whether a user-triggered retry (resend, reselect channel) may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::WriteNotAcknowledged { source, .. } | Self::Subscribe { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }
}
