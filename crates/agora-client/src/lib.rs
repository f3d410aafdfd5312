//! # agora-client
//!
//! The real-time channel synchronization engine. A [`ChatSession`] binds one
//! channel at a time and keeps two read models current from the remote
//! store's snapshots:
//!
//! - [`MessageLog`]: the bound channel's messages, ordered and deduplicated,
//!   with optimistic echoes for messages still being sent.
//! - [`PresenceSet`]: every other user currently online.
//!
//! [`SubscriptionManager`] guarantees at most one live subscription per topic
//! and that nothing delivered for a canceled subscription reaches the read
//! models.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod message_log;
pub mod presence;
pub mod search;
pub mod session;
pub mod subscription;

pub use config::SessionConfig;
pub use error::SessionError;
pub use events::ListenerId;
pub use message_log::{DeliveryState, LogEntry, MessageLog};
pub use presence::PresenceSet;
pub use search::{search, SearchOutcome};
pub use session::{ChatSession, FeedStatus, LastSearch, SessionState};
pub use subscription::{Delivery, SubscriptionHandle, SubscriptionManager};
