//! In-memory document state of the hub.
//!
//! Keeps every collection as a map from document id to its body and
//! insertion sequence, and evaluates queries against it.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use agora_shared::remote::{Document, Query, Snapshot};
use agora_shared::types::{Collection, DocumentId};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    fields: Value,
}

/// Outcome of a write: the body before and after, for deciding which
/// subscriptions are affected.
#[derive(Debug, Clone)]
pub struct Change {
    pub collection: Collection,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl Change {
    /// Whether the write can alter the result set of `query`.
    pub fn affects(&self, query: &Query) -> bool {
        let hit = |fields: &Option<Value>| {
            fields
                .as_ref()
                .is_some_and(|f| query.matches(self.collection, f))
        };
        hit(&self.before) || hit(&self.after)
    }
}

/// All documents held by the hub.
#[derive(Debug, Default)]
pub struct DocumentSet {
    collections: HashMap<Collection, HashMap<DocumentId, Entry>>,
    next_seq: u64,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next new document will receive.
    pub fn peek_seq(&self) -> u64 {
        self.next_seq + 1
    }

    /// Sequence number an upsert of `id` would be stored under.
    pub fn seq_for(&self, collection: Collection, id: &DocumentId) -> u64 {
        self.collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .map(|entry| entry.seq)
            .unwrap_or_else(|| self.peek_seq())
    }

    /// Insert or replace a document. Replacing keeps the original sequence.
    pub fn upsert(&mut self, collection: Collection, id: DocumentId, fields: Value) -> Change {
        let docs = self.collections.entry(collection).or_default();
        let before = match docs.get_mut(&id) {
            Some(entry) => Some(std::mem::replace(&mut entry.fields, fields.clone())),
            None => {
                self.next_seq += 1;
                docs.insert(
                    id,
                    Entry {
                        seq: self.next_seq,
                        fields: fields.clone(),
                    },
                );
                None
            }
        };

        Change {
            collection,
            before,
            after: Some(fields),
        }
    }

    /// Restore a persisted document with its original sequence number.
    pub fn restore(&mut self, collection: Collection, seq: u64, doc: Document) {
        self.next_seq = self.next_seq.max(seq);
        self.collections.entry(collection).or_default().insert(
            doc.id,
            Entry {
                seq,
                fields: doc.fields,
            },
        );
    }

    pub fn remove(&mut self, collection: Collection, id: &DocumentId) -> Option<Change> {
        let entry = self.collections.get_mut(&collection)?.remove(id)?;
        debug!(collection = %collection, id = %id, "Document removed");
        Some(Change {
            collection,
            before: Some(entry.fields),
            after: None,
        })
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.collections.get(&collection).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.collections.values().all(HashMap::is_empty)
    }

    /// Evaluate `query`: filter, then sort by the query's order with the
    /// insertion sequence as tie-breaker (and as the only key when unordered).
    pub fn evaluate(&self, query: &Query) -> Snapshot {
        let Some(docs) = self.collections.get(&query.collection) else {
            return Snapshot::default();
        };

        let mut hits: Vec<(&DocumentId, &Entry)> = docs
            .iter()
            .filter(|(_, entry)| query.filter.matches(&entry.fields))
            .collect();

        hits.sort_by(|(_, a), (_, b)| {
            let by_order = query
                .order
                .as_ref()
                .map(|order| order.compare(&a.fields, &b.fields))
                .unwrap_or(std::cmp::Ordering::Equal);
            by_order.then(a.seq.cmp(&b.seq))
        });

        Snapshot::new(
            hits.into_iter()
                .map(|(id, entry)| Document::new(id.clone(), entry.fields.clone()))
                .collect(),
        )
    }
}
