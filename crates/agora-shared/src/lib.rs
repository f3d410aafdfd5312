//! # agora-shared
//!
//! Types shared by every Agora crate: identifiers, chat records, subscription
//! topics, the wire-document codec and the [`remote::RemoteStore`] contract
//! that the synchronization engine talks to.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod remote;
pub mod text;
pub mod types;

pub use error::{DecodeError, RemoteError, ValidationError};
pub use models::{LocalProfile, Message, PresenceEntry};
pub use remote::{Document, Query, RemoteStore, RemoteSubscription, Snapshot};
pub use types::{ChannelId, Collection, DocumentId, MessageId, SentAt, Topic, UserId};
