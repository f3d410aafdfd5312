// In-process reference implementation of the Agora remote document store.

pub mod clock;
pub mod collections;
pub mod config;
pub mod hub;
pub mod subscriptions;

pub use collections::DocumentSet;
pub use config::HubConfig;
pub use hub::{spawn_hub, Faults, HubCommand, HubHandle};
pub use subscriptions::SubscriptionRegistry;
