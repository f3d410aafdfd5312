//! Hub orchestration with the tokio mpsc command pattern.
//!
//! The hub runs in a dedicated tokio task that owns all document state.
//! Callers talk to it through a cloneable [`HubHandle`], which implements
//! [`RemoteStore`] by sending typed commands and awaiting oneshot replies.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use agora_shared::remote::{
    Document, Query, RemoteStore, RemoteSubscription, RemoteSubscriptionId, SnapshotStream,
};
use agora_shared::types::{Collection, DocumentId};
use agora_shared::RemoteError;
use agora_store::Database;

use crate::clock::ServerClock;
use crate::collections::DocumentSet;
use crate::config::HubConfig;
use crate::subscriptions::SubscriptionRegistry;

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Commands sent *into* the hub task.
#[derive(Debug)]
pub enum HubCommand {
    /// Append a document under a fresh id.
    Add {
        collection: Collection,
        fields: Value,
        reply: oneshot::Sender<Result<DocumentId, RemoteError>>,
    },
    /// Create or replace a document under a caller-chosen id.
    Set {
        collection: Collection,
        id: DocumentId,
        fields: Value,
        reply: oneshot::Sender<Result<(), RemoteError>>,
    },
    /// Remove a document. Replies whether it existed.
    Delete {
        collection: Collection,
        id: DocumentId,
        reply: oneshot::Sender<bool>,
    },
    /// Open a live query.
    Subscribe {
        query: Query,
        reply: oneshot::Sender<Result<RemoteSubscription, RemoteError>>,
    },
    /// Close a live query.
    Cancel(RemoteSubscriptionId),
    /// Replace the active fault injection settings.
    SetFaults(Faults),
    /// Request counters describing the hub's current state.
    Stats(oneshot::Sender<HubStats>),
    /// Gracefully shut down the hub.
    Shutdown,
}

/// Failure modes the hub can be told to simulate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Every write and subscribe fails as a connectivity error.
    pub offline: bool,
    /// Every write is refused with this reason.
    pub reject_writes: Option<String>,
}

impl Faults {
    pub fn offline() -> Self {
        Self {
            offline: true,
            reject_writes: None,
        }
    }

    pub fn reject_writes(reason: impl Into<String>) -> Self {
        Self {
            offline: false,
            reject_writes: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub subscriptions: usize,
    pub messages: usize,
    pub users: usize,
}

// ---------------------------------------------------------------------------
// Hub state
// ---------------------------------------------------------------------------

struct HubState {
    docs: DocumentSet,
    subscriptions: SubscriptionRegistry,
    clock: ServerClock,
    database: Option<Database>,
    faults: Faults,
    snapshot_buffer: usize,
}

impl HubState {
    fn open(config: &HubConfig) -> anyhow::Result<Self> {
        let mut state = Self {
            docs: DocumentSet::new(),
            subscriptions: SubscriptionRegistry::new(),
            clock: ServerClock::new(),
            database: None,
            faults: Faults::default(),
            snapshot_buffer: config.snapshot_buffer,
        };

        if let Some(ref path) = config.database_path {
            let database = Database::open_at(path)?;
            state.restore_from(&database)?;
            state.database = Some(database);
        }

        Ok(state)
    }

    fn restore_from(&mut self, database: &Database) -> anyhow::Result<()> {
        for collection in [Collection::Messages, Collection::Users] {
            let stored = database.load_collection(collection)?;
            info!(collection = %collection, count = stored.len(), "Restoring documents");

            for doc in stored {
                if let Some(ts) = doc
                    .document
                    .fields
                    .get(agora_shared::constants::FIELD_SENT_AT)
                    .and_then(Value::as_str)
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                {
                    self.clock.observe(ts.with_timezone(&chrono::Utc));
                }
                self.docs.restore(collection, doc.seq, doc.document);
            }
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), RemoteError> {
        if self.faults.offline {
            return Err(RemoteError::Unavailable("hub offline".into()));
        }
        if let Some(ref reason) = self.faults.reject_writes {
            return Err(RemoteError::Rejected(reason.clone()));
        }
        Ok(())
    }

    fn write(
        &mut self,
        collection: Collection,
        id: DocumentId,
        mut fields: Value,
    ) -> Result<(), RemoteError> {
        self.check_writable()?;

        if !fields.is_object() {
            return Err(RemoteError::Rejected(
                "document body must be a JSON object".into(),
            ));
        }

        self.clock.resolve_placeholders(&mut fields);

        if let Some(ref database) = self.database {
            let seq = self.docs.seq_for(collection, &id);
            let doc = Document::new(id.clone(), fields.clone());
            database.upsert_document(collection, seq, &doc).map_err(|e| {
                error!(collection = %collection, id = %id, error = %e, "Failed to persist document");
                RemoteError::Unavailable(format!("storage failure: {e}"))
            })?;
        }

        debug!(collection = %collection, id = %id, "Document written");

        let change = self.docs.upsert(collection, id, fields);
        self.subscriptions.notify(&change, &self.docs);
        Ok(())
    }

    fn delete(&mut self, collection: Collection, id: &DocumentId) -> bool {
        if let Some(ref database) = self.database {
            if let Err(e) = database.delete_document(collection, id) {
                error!(collection = %collection, id = %id, error = %e, "Failed to delete persisted document");
                return false;
            }
        }

        match self.docs.remove(collection, id) {
            Some(change) => {
                self.subscriptions.notify(&change, &self.docs);
                true
            }
            None => false,
        }
    }

    fn subscribe(&mut self, query: Query) -> Result<RemoteSubscription, RemoteError> {
        if self.faults.offline {
            return Err(RemoteError::Unavailable("hub offline".into()));
        }

        let (tx, snapshots) = SnapshotStream::channel(self.snapshot_buffer);
        let id = self.subscriptions.open(query, tx, &self.docs);
        Ok(RemoteSubscription { id, snapshots })
    }

    fn stats(&self) -> HubStats {
        HubStats {
            subscriptions: self.subscriptions.len(),
            messages: self.docs.len(Collection::Messages),
            users: self.docs.len(Collection::Users),
        }
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Spawn the hub in a background tokio task.
///
/// Documents persisted at `config.database_path` are loaded before the task
/// starts serving commands.
pub async fn spawn_hub(config: HubConfig) -> anyhow::Result<HubHandle> {
    let mut state = HubState::open(&config)?;

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<HubCommand>(config.command_buffer.max(1));

    info!(
        persistent = config.database_path.is_some(),
        messages = state.docs.len(Collection::Messages),
        users = state.docs.len(Collection::Users),
        "Hub started"
    );

    let redeliver_interval = config.redeliver_interval;

    tokio::spawn(async move {
        let mut redeliver = tokio::time::interval(redeliver_interval);
        redeliver.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(HubCommand::Add { collection, fields, reply }) => {
                            let id = DocumentId::generate();
                            let result = state.write(collection, id.clone(), fields).map(|()| id);
                            if let Err(ref e) = result {
                                warn!(collection = %collection, error = %e, "Add refused");
                            }
                            let _ = reply.send(result);
                        }
                        Some(HubCommand::Set { collection, id, fields, reply }) => {
                            let result = state.write(collection, id.clone(), fields);
                            if let Err(ref e) = result {
                                warn!(collection = %collection, id = %id, error = %e, "Set refused");
                            }
                            let _ = reply.send(result);
                        }
                        Some(HubCommand::Delete { collection, id, reply }) => {
                            let _ = reply.send(state.delete(collection, &id));
                        }
                        Some(HubCommand::Subscribe { query, reply }) => {
                            let result = state.subscribe(query);
                            if let Err(ref e) = result {
                                warn!(error = %e, "Subscribe refused");
                            }
                            let _ = reply.send(result);
                        }
                        Some(HubCommand::Cancel(id)) => {
                            state.subscriptions.close(id);
                        }
                        Some(HubCommand::SetFaults(faults)) => {
                            info!(?faults, "Fault injection updated");
                            state.faults = faults;
                        }
                        Some(HubCommand::Stats(reply)) => {
                            let _ = reply.send(state.stats());
                        }
                        Some(HubCommand::Shutdown) => {
                            info!("Hub shutdown requested");
                            break;
                        }
                        None => {
                            // All handles dropped
                            info!("Command channel closed, shutting down hub");
                            break;
                        }
                    }
                }

                _ = redeliver.tick(), if state.subscriptions.has_deferred() => {
                    state.subscriptions.redeliver_deferred(&state.docs);
                }
            }
        }

        info!("Hub event loop terminated");
    });

    Ok(HubHandle { cmd_tx })
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable client side of a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, RemoteError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RemoteError::Closed)?;
        reply_rx.await.map_err(|_| RemoteError::Closed)
    }

    /// Remove a document, notifying every subscription that contained it.
    pub async fn delete(&self, collection: Collection, id: DocumentId) -> Result<bool, RemoteError> {
        self.request(|reply| HubCommand::Delete {
            collection,
            id,
            reply,
        })
        .await
    }

    pub async fn set_faults(&self, faults: Faults) -> Result<(), RemoteError> {
        self.cmd_tx
            .send(HubCommand::SetFaults(faults))
            .await
            .map_err(|_| RemoteError::Closed)
    }

    pub async fn clear_faults(&self) -> Result<(), RemoteError> {
        self.set_faults(Faults::default()).await
    }

    pub async fn stats(&self) -> Result<HubStats, RemoteError> {
        self.request(HubCommand::Stats).await
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(HubCommand::Shutdown).await;
    }
}

impl RemoteStore for HubHandle {
    async fn add(&self, collection: Collection, fields: Value) -> Result<DocumentId, RemoteError> {
        self.request(|reply| HubCommand::Add {
            collection,
            fields,
            reply,
        })
        .await?
    }

    async fn set(
        &self,
        collection: Collection,
        id: DocumentId,
        fields: Value,
    ) -> Result<(), RemoteError> {
        self.request(|reply| HubCommand::Set {
            collection,
            id,
            fields,
            reply,
        })
        .await?
    }

    async fn subscribe(&self, query: Query) -> Result<RemoteSubscription, RemoteError> {
        self.request(|reply| HubCommand::Subscribe { query, reply })
            .await?
    }

    fn cancel(&self, id: RemoteSubscriptionId) {
        match self.cmd_tx.try_send(HubCommand::Cancel(id)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                // Teardown may finish later; callers already treat the
                // subscription as inert.
                let tx = self.cmd_tx.clone();
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move {
                        let _ = tx.send(cmd).await;
                    });
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscription = %id, "Hub already stopped, nothing to cancel");
            }
        }
    }
}
