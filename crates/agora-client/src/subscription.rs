//! One live remote subscription per topic.
//!
//! The manager owns every raw remote subscription. Snapshot streams of all
//! live subscriptions are merged into a single stream whose items are tagged
//! with the handle (topic + generation) that produced them. A delivery is only
//! handed to a callback if its generation still matches the live handle for
//! its topic, so once [`SubscriptionManager::cancel`] returns, nothing queued
//! for that handle can reach the read models, even though the remote side may
//! still be tearing the subscription down.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{BoxStream, SelectAll};
use futures::{FutureExt, StreamExt};
use tracing::{debug, trace};

use agora_shared::remote::{Query, RemoteStore, RemoteSubscriptionId, Snapshot};
use agora_shared::types::Topic;
use agora_shared::RemoteError;

/// Callback applied to each accepted snapshot, with mutable access to the
/// caller-supplied context (the read models, in a session).
pub type SnapshotCallback<C> = Box<dyn FnMut(&mut C, Snapshot) + Send>;

/// Identifies one subscription instance. A topic that is resubscribed gets a
/// handle with a new generation, so old handles never compare equal to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: Topic,
    generation: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.topic, self.generation)
    }
}

/// A snapshot tagged with the handle it was produced for.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub handle: SubscriptionHandle,
    pub snapshot: Snapshot,
}

struct LiveSubscription<C> {
    handle: SubscriptionHandle,
    remote_id: RemoteSubscriptionId,
    callback: SnapshotCallback<C>,
}

pub struct SubscriptionManager<R: RemoteStore, C> {
    remote: Arc<R>,
    live: HashMap<Topic, LiveSubscription<C>>,
    streams: SelectAll<BoxStream<'static, Delivery>>,
    next_generation: u64,
}

impl<R: RemoteStore, C> SubscriptionManager<R, C> {
    pub fn new(remote: Arc<R>) -> Self {
        Self {
            remote,
            live: HashMap::new(),
            streams: SelectAll::new(),
            next_generation: 0,
        }
    }

    /// Subscribe `callback` to `topic`.
    ///
    /// Any live subscription for the same topic is canceled first, so at most
    /// one handle per topic exists at any time. If the remote store refuses,
    /// the error is returned and the topic is left without a subscription.
    pub async fn subscribe(
        &mut self,
        topic: Topic,
        callback: SnapshotCallback<C>,
    ) -> Result<SubscriptionHandle, RemoteError> {
        if let Some(previous) = self.live_handle(&topic).cloned() {
            debug!(handle = %previous, "Replacing live subscription");
            self.cancel(&previous);
        }

        self.next_generation += 1;
        let handle = SubscriptionHandle {
            topic: topic.clone(),
            generation: self.next_generation,
        };

        let remote = self.remote.subscribe(Query::for_topic(&topic)).await?;

        let tag = handle.clone();
        self.streams.push(
            remote
                .snapshots
                .map(move |snapshot| Delivery {
                    handle: tag.clone(),
                    snapshot,
                })
                .boxed(),
        );

        debug!(handle = %handle, remote = %remote.id, "Subscription live");

        self.live.insert(
            topic,
            LiveSubscription {
                handle: handle.clone(),
                remote_id: remote.id,
                callback,
            },
        );

        Ok(handle)
    }

    /// Cancel a subscription. Returns `true` if `handle` was the live handle
    /// for its topic; canceling a stale or already canceled handle is a no-op.
    pub fn cancel(&mut self, handle: &SubscriptionHandle) -> bool {
        match self.live.get(&handle.topic) {
            Some(live) if live.handle == *handle => {}
            _ => {
                trace!(handle = %handle, "Cancel of inactive handle ignored");
                return false;
            }
        }

        if let Some(live) = self.live.remove(&handle.topic) {
            self.remote.cancel(live.remote_id);
            debug!(handle = %handle, "Subscription canceled");
        }
        true
    }

    /// Cancel every live subscription.
    pub fn cancel_all(&mut self) {
        let handles: Vec<SubscriptionHandle> =
            self.live.values().map(|live| live.handle.clone()).collect();
        for handle in handles {
            self.cancel(&handle);
        }
    }

    pub fn live_handle(&self, topic: &Topic) -> Option<&SubscriptionHandle> {
        self.live.get(topic).map(|live| &live.handle)
    }

    pub fn is_live(&self, handle: &SubscriptionHandle) -> bool {
        self.live_handle(&handle.topic) == Some(handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Wait for the next delivery from any stream, live or stale.
    ///
    /// Returns `None` right away when no stream is open.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        if self.streams.is_empty() {
            return None;
        }
        self.streams.next().await
    }

    /// A delivery that is already buffered, without waiting.
    pub fn try_next_delivery(&mut self) -> Option<Delivery> {
        if self.streams.is_empty() {
            return None;
        }
        self.streams.next().now_or_never().flatten()
    }

    /// Hand `delivery` to the callback of its topic if, and only if, it was
    /// produced for the topic's current live handle. Returns whether it was
    /// applied.
    pub fn dispatch(&mut self, delivery: Delivery, ctx: &mut C) -> bool {
        match self.live.get_mut(&delivery.handle.topic) {
            Some(live) if live.handle.generation == delivery.handle.generation => {
                trace!(
                    handle = %delivery.handle,
                    size = delivery.snapshot.len(),
                    "Applying snapshot"
                );
                (live.callback)(ctx, delivery.snapshot);
                true
            }
            _ => {
                trace!(handle = %delivery.handle, "Dropping snapshot of superseded subscription");
                false
            }
        }
    }
}

impl<R: RemoteStore, C> Drop for SubscriptionManager<R, C> {
    fn drop(&mut self) {
        if !self.live.is_empty() {
            debug!(count = self.live.len(), "Releasing remote subscriptions on drop");
        }
        for live in self.live.values() {
            self.remote.cancel(live.remote_id);
        }
    }
}
