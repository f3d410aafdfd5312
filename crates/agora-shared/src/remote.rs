//! Contract between the synchronization engine and the remote document store.
//!
//! The store is an append-only, queryable collection of JSON documents. A
//! subscription delivers the *full* current result set of its query once when
//! it is established and again after every change that affects the query,
//! until it is canceled. There are no delta events.

use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::constants::{FIELD_CHANNEL, FIELD_SENT_AT, FIELD_STATUS, STATUS_ONLINE};
use crate::error::RemoteError;
use crate::types::{Collection, DocumentId, Topic};

// ---------------------------------------------------------------------------
// Documents and snapshots
// ---------------------------------------------------------------------------

/// A stored document: the store-assigned id plus its JSON fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub fields: Value,
}

impl Document {
    pub fn new(id: DocumentId, fields: Value) -> Self {
        Self { id, fields }
    }
}

/// The complete result set of a query at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

impl Snapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Equality predicate on one top-level field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub equals: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            equals: value.into(),
        }
    }

    pub fn matches(&self, fields: &Value) -> bool {
        fields.get(&self.field) == Some(&self.equals)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    /// Compare two documents by this sort key. Documents missing the field
    /// sort last regardless of direction.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a.get(&self.field), b.get(&self.field)) {
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y);
                match self.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// A filtered, optionally sorted view over one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: Collection,
    pub filter: FieldFilter,
    pub order: Option<OrderBy>,
}

impl Query {
    /// Messages of one channel, oldest first by server time.
    pub fn channel_messages(channel: &str) -> Self {
        Self {
            collection: Collection::Messages,
            filter: FieldFilter::eq(FIELD_CHANNEL, channel),
            order: Some(OrderBy::ascending(FIELD_SENT_AT)),
        }
    }

    /// Users whose presence status is online. Unordered.
    pub fn online_users() -> Self {
        Self {
            collection: Collection::Users,
            filter: FieldFilter::eq(FIELD_STATUS, STATUS_ONLINE),
            order: None,
        }
    }

    pub fn for_topic(topic: &Topic) -> Self {
        match topic {
            Topic::ChannelMessages(channel) => Self::channel_messages(channel.as_str()),
            Topic::Presence => Self::online_users(),
        }
    }

    pub fn matches(&self, collection: Collection, fields: &Value) -> bool {
        self.collection == collection && self.filter.matches(fields)
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Store-side identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteSubscriptionId(pub u64);

impl std::fmt::Display for RemoteSubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Stream of snapshots for one subscription. Ends when the store drops the
/// sending side, which it does once the subscription is canceled.
#[derive(Debug)]
pub struct SnapshotStream {
    rx: mpsc::Receiver<Snapshot>,
}

impl SnapshotStream {
    pub fn new(rx: mpsc::Receiver<Snapshot>) -> Self {
        Self { rx }
    }

    /// Pair a sender with the stream that reads from it.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Snapshot>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }

    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }
}

impl Stream for SnapshotStream {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// An established subscription: its id (for [`RemoteStore::cancel`]) and the
/// snapshots it produces.
#[derive(Debug)]
pub struct RemoteSubscription {
    pub id: RemoteSubscriptionId,
    pub snapshots: SnapshotStream,
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// The remote document store the engine synchronizes with.
///
/// Writes and subscription setup are the only suspension points. `cancel` is
/// a synchronous request; the store may finish tearing the subscription down
/// later, so consumers must tolerate snapshots that were already in flight.
pub trait RemoteStore: Send + Sync + 'static {
    /// Append a document. The store assigns the id and resolves any
    /// [`crate::constants::SERVER_TIMESTAMP`] placeholders.
    fn add(
        &self,
        collection: Collection,
        fields: Value,
    ) -> impl Future<Output = Result<DocumentId, RemoteError>> + Send;

    /// Create or replace the document with a caller-chosen id.
    fn set(
        &self,
        collection: Collection,
        id: DocumentId,
        fields: Value,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Start listening to `query`. Resolves once the store has accepted the
    /// subscription; the first snapshot follows on the stream.
    fn subscribe(
        &self,
        query: Query,
    ) -> impl Future<Output = Result<RemoteSubscription, RemoteError>> + Send;

    /// Ask the store to stop a subscription. Unknown or already finished ids
    /// are ignored.
    fn cancel(&self, id: RemoteSubscriptionId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches_exact_value() {
        let filter = FieldFilter::eq("channel", "ideas");
        assert!(filter.matches(&json!({"channel": "ideas", "text": "x"})));
        assert!(!filter.matches(&json!({"channel": "support"})));
        assert!(!filter.matches(&json!({"text": "no channel"})));
    }

    #[test]
    fn test_order_missing_field_last() {
        let order = OrderBy::ascending("sentAt");
        let a = json!({"sentAt": "2024-01-01T00:00:00.000000Z"});
        let b = json!({"sentAt": "2024-01-02T00:00:00.000000Z"});
        let missing = json!({});
        assert_eq!(order.compare(&a, &b), Ordering::Less);
        assert_eq!(order.compare(&b, &a), Ordering::Greater);
        assert_eq!(order.compare(&a, &missing), Ordering::Less);
        assert_eq!(order.compare(&missing, &a), Ordering::Greater);
    }

    #[test]
    fn test_query_for_topic() {
        let topic = Topic::ChannelMessages(crate::types::ChannelId::new("ideas"));
        let query = Query::for_topic(&topic);
        assert_eq!(query.collection, Collection::Messages);
        assert!(query.matches(Collection::Messages, &json!({"channel": "ideas"})));
        assert!(!query.matches(Collection::Users, &json!({"channel": "ideas"})));

        let presence = Query::for_topic(&Topic::Presence);
        assert!(presence.order.is_none());
        assert!(presence.matches(Collection::Users, &json!({"status": "online"})));
        assert!(!presence.matches(Collection::Users, &json!({"status": "offline"})));
    }

    #[tokio::test]
    async fn test_snapshot_stream_ends_when_sender_dropped() {
        use futures::StreamExt;

        let (tx, mut stream) = SnapshotStream::channel(4);
        tx.send(Snapshot::default()).await.unwrap();
        drop(tx);

        assert_eq!(stream.next().await, Some(Snapshot::default()));
        assert_eq!(stream.next().await, None);
    }
}
