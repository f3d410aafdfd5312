use thiserror::Error;

/// Failures reported by a [`crate::remote::RemoteStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connectivity problem; the caller may retry on user action.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the request (permission, quota, malformed write).
    #[error("Remote store rejected the request: {0}")]
    Rejected(String),

    /// The store has shut down and will not answer again.
    #[error("Remote store closed")]
    Closed,
}

impl RemoteError {
    /// Whether a later, user-triggered retry can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A document that could not be turned into a domain record.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed document {id}: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Document {id} has empty text")]
    EmptyText { id: String },
}

/// Local input problems. These never reach the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message text is empty")]
    EmptyText,

    #[error("Message text too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },
}
