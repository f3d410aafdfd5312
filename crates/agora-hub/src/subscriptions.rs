//! Live query subscriptions held by the hub.
//!
//! Each subscriber gets the full result set of its query whenever a change
//! touches it. Delivery never blocks the hub: if a subscriber's buffer is
//! full the subscription is marked deferred and receives the then-current
//! snapshot on a later retry, which is enough because every snapshot
//! supersedes the previous one.

use std::collections::BTreeMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use agora_shared::remote::{Query, RemoteSubscriptionId, Snapshot};

use crate::collections::{Change, DocumentSet};

#[derive(Debug)]
struct Subscriber {
    query: Query,
    tx: mpsc::Sender<Snapshot>,
    deferred: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Sent,
    Deferred,
    Gone,
}

/// Tracks every open subscription.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscribers: BTreeMap<RemoteSubscriptionId, Subscriber>,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and push its initial snapshot.
    pub fn open(
        &mut self,
        query: Query,
        tx: mpsc::Sender<Snapshot>,
        docs: &DocumentSet,
    ) -> RemoteSubscriptionId {
        self.next_id += 1;
        let id = RemoteSubscriptionId(self.next_id);
        let initial = docs.evaluate(&query);

        debug!(subscription = %id, collection = %query.collection, initial = initial.len(), "Subscription opened");

        self.subscribers.insert(
            id,
            Subscriber {
                query,
                tx,
                deferred: false,
            },
        );
        self.push(id, initial);
        id
    }

    /// Drop a subscriber. Its stream ends once buffered snapshots are read.
    pub fn close(&mut self, id: RemoteSubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscription = %id, "Subscription closed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn has_deferred(&self) -> bool {
        self.subscribers.values().any(|s| s.deferred)
    }

    /// Push a fresh snapshot to every subscriber whose query `change` affects.
    pub fn notify(&mut self, change: &Change, docs: &DocumentSet) {
        let affected: Vec<(RemoteSubscriptionId, Snapshot)> = self
            .subscribers
            .iter()
            .filter(|(_, s)| change.affects(&s.query))
            .map(|(id, s)| (*id, docs.evaluate(&s.query)))
            .collect();

        for (id, snapshot) in affected {
            self.push(id, snapshot);
        }
    }

    /// Retry subscribers whose last delivery was deferred.
    pub fn redeliver_deferred(&mut self, docs: &DocumentSet) {
        let deferred: Vec<(RemoteSubscriptionId, Snapshot)> = self
            .subscribers
            .iter()
            .filter(|(_, s)| s.deferred)
            .map(|(id, s)| (*id, docs.evaluate(&s.query)))
            .collect();

        for (id, snapshot) in deferred {
            self.push(id, snapshot);
        }
    }

    fn push(&mut self, id: RemoteSubscriptionId, snapshot: Snapshot) {
        let Some(subscriber) = self.subscribers.get_mut(&id) else {
            return;
        };

        let size = snapshot.len();
        let outcome = match subscriber.tx.try_send(snapshot) {
            Ok(()) => SendOutcome::Sent,
            Err(TrySendError::Full(_)) => SendOutcome::Deferred,
            Err(TrySendError::Closed(_)) => SendOutcome::Gone,
        };

        match outcome {
            SendOutcome::Sent => {
                trace!(subscription = %id, size, "Snapshot delivered");
                subscriber.deferred = false;
            }
            SendOutcome::Deferred => {
                warn!(subscription = %id, "Subscriber buffer full, deferring snapshot");
                subscriber.deferred = true;
            }
            SendOutcome::Gone => {
                debug!(subscription = %id, "Subscriber went away");
                self.subscribers.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::types::{Collection, DocumentId};
    use serde_json::json;

    fn message(docs: &mut DocumentSet, id: &str, channel: &str) -> Change {
        docs.upsert(
            Collection::Messages,
            DocumentId::new(id),
            json!({"channel": channel, "sentAt": "2024-01-01T00:00:00.000000Z"}),
        )
    }

    #[test]
    fn test_open_sends_initial_snapshot() {
        let mut docs = DocumentSet::new();
        message(&mut docs, "m1", "ideas");

        let mut registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.open(Query::channel_messages("ideas"), tx, &docs);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_notify_only_affected() {
        let mut docs = DocumentSet::new();
        let mut registry = SubscriptionRegistry::new();

        let (ideas_tx, mut ideas_rx) = mpsc::channel(4);
        let (support_tx, mut support_rx) = mpsc::channel(4);
        registry.open(Query::channel_messages("ideas"), ideas_tx, &docs);
        registry.open(Query::channel_messages("support"), support_tx, &docs);
        ideas_rx.try_recv().unwrap();
        support_rx.try_recv().unwrap();

        let change = message(&mut docs, "m1", "ideas");
        registry.notify(&change, &docs);

        assert_eq!(ideas_rx.try_recv().unwrap().len(), 1);
        assert!(support_rx.try_recv().is_err());
    }

    #[test]
    fn test_full_buffer_defers_then_catches_up() {
        let mut docs = DocumentSet::new();
        let mut registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.open(Query::channel_messages("ideas"), tx, &docs);

        // Buffer holds the initial snapshot, so this one is deferred.
        let change = message(&mut docs, "m1", "ideas");
        registry.notify(&change, &docs);
        assert!(registry.has_deferred());

        assert!(rx.try_recv().unwrap().is_empty());
        message(&mut docs, "m2", "ideas");
        registry.redeliver_deferred(&docs);
        assert!(!registry.has_deferred());
        assert_eq!(rx.try_recv().unwrap().len(), 2);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let mut docs = DocumentSet::new();
        let mut registry = SubscriptionRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        registry.open(Query::channel_messages("ideas"), tx, &docs);
        drop(rx);

        let change = message(&mut docs, "m1", "ideas");
        registry.notify(&change, &docs);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let docs = DocumentSet::new();
        let mut registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = registry.open(Query::online_users(), tx, &docs);
        assert!(registry.close(id));
        assert!(!registry.close(id));
    }
}
