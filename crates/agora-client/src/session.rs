//! The chat session: sign-in state, the bound channel and the read models
//! the presentation layer renders.
//!
//! A [`ChatSession`] owns one [`SubscriptionManager`] with at most two live
//! topics (the bound channel's messages and presence). Every method takes
//! `&mut self`, so state transitions never interleave. Snapshots only reach
//! the read models through [`ChatSession::pump`] or
//! [`ChatSession::process_pending`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use agora_shared::models::{LocalProfile, Message};
use agora_shared::protocol::{
    decode_message, decode_presence, outgoing_message_fields, PresenceRecord, PresenceStatus,
};
use agora_shared::remote::{RemoteStore, Snapshot};
use agora_shared::text::normalize_message;
use agora_shared::types::{ChannelId, Collection, DocumentId, MessageId, Topic};
use agora_shared::RemoteError;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{ListenerId, Listeners};
use crate::message_log::{DeliveryState, MessageLog};
use crate::presence::PresenceSet;
use crate::search::{search, SearchOutcome};
use crate::subscription::{SnapshotCallback, SubscriptionManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    SignedIn {
        user: LocalProfile,
        channel: ChannelId,
    },
}

/// Health of one subscription feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    /// No subscription requested.
    Idle,
    Live,
    /// The subscribe call failed. Nothing retries automatically.
    Failed(RemoteError),
}

/// The most recent search and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastSearch {
    pub term: String,
    pub outcome: SearchOutcome,
}

/// Read models plus their listeners. This is the context snapshot callbacks
/// mutate.
struct ReadModels {
    log: MessageLog,
    presence: PresenceSet,
    log_listeners: Listeners<MessageLog>,
    presence_listeners: Listeners<PresenceSet>,
}

impl ReadModels {
    fn apply_messages(&mut self, channel: &ChannelId, snapshot: Snapshot) {
        let mut messages = Vec::with_capacity(snapshot.len());
        for doc in snapshot.iter() {
            match decode_message(doc) {
                Ok(message) if &message.channel == channel => messages.push(message),
                Ok(message) => {
                    warn!(id = %doc.id, channel = %message.channel, "Skipping message from another channel");
                }
                Err(e) => warn!(error = %e, "Skipping undecodable message"),
            }
        }

        if self.log.apply_snapshot(messages) {
            self.notify_log();
        }
    }

    fn apply_presence(&mut self, snapshot: Snapshot) {
        let mut entries = Vec::with_capacity(snapshot.len());
        for doc in snapshot.iter() {
            match decode_presence(doc) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "Skipping undecodable presence entry"),
            }
        }

        if self.presence.apply_snapshot(entries) {
            self.notify_presence();
        }
    }

    fn notify_log(&mut self) {
        self.log_listeners.notify(&self.log);
    }

    fn notify_presence(&mut self) {
        self.presence_listeners.notify(&self.presence);
    }
}

pub struct ChatSession<R: RemoteStore> {
    remote: Arc<R>,
    config: SessionConfig,
    state: SessionState,
    subscriptions: SubscriptionManager<R, ReadModels>,
    models: ReadModels,
    channel_status: FeedStatus,
    presence_status: FeedStatus,
    /// Whether the online presence write of this sign-in went through.
    presence_published: bool,
    last_search: Option<LastSearch>,
}

impl<R: RemoteStore> ChatSession<R> {
    pub fn new(remote: Arc<R>, config: SessionConfig) -> Self {
        let models = ReadModels {
            log: MessageLog::new(config.reconcile_window),
            presence: PresenceSet::new(),
            log_listeners: Listeners::new(),
            presence_listeners: Listeners::new(),
        };

        Self {
            subscriptions: SubscriptionManager::new(remote.clone()),
            remote,
            config,
            state: SessionState::SignedOut,
            models,
            channel_status: FeedStatus::Idle,
            presence_status: FeedStatus::Idle,
            presence_published: false,
            last_search: None,
        }
    }

    // -- state transitions --------------------------------------------------

    /// Enter the signed-in state for an authenticated user, publish their
    /// presence and bind the presence feed and the default channel.
    ///
    /// The session stays signed in even if a subscription fails; the first
    /// such failure is returned and shows in the feed status.
    pub async fn sign_in(&mut self, user: LocalProfile) -> Result<(), SessionError> {
        if let SessionState::SignedIn { ref user, .. } = self.state {
            return Err(SessionError::AlreadySignedIn(user.user_id.clone()));
        }

        let channel = self.config.default_channel.clone();
        info!(user = %user.user_id, channel = %channel, "Signing in");

        self.models.log.reset();
        self.models.presence.set_local_user(Some(user.user_id.clone()));
        self.last_search = None;
        self.state = SessionState::SignedIn {
            user: user.clone(),
            channel: channel.clone(),
        };

        self.presence_published = self.publish_presence(&user, PresenceStatus::Online).await;

        let presence = self.bind_presence().await;
        let messages = self.bind_channel(channel).await;
        presence.and(messages)
    }

    /// Rebind the session to `channel`: cancel the current channel feed,
    /// reset the log, then subscribe to the new channel. A healthy presence
    /// feed is not touched; one that failed earlier is retried first.
    /// Selecting the already bound, healthy channel does nothing else;
    /// selecting it after a failed subscribe retries.
    pub async fn switch_channel(&mut self, channel: ChannelId) -> Result<(), SessionError> {
        let previous = match self.state {
            SessionState::SignedIn { channel: ref current, .. } => current.clone(),
            SessionState::SignedOut => return Err(SessionError::NotSignedIn),
        };

        let presence = self.recover_presence().await;

        if previous == channel && self.channel_status == FeedStatus::Live {
            debug!(channel = %channel, "Already bound to channel");
            return presence;
        }

        info!(from = %previous, to = %channel, "Switching channel");

        let old_topic = Topic::ChannelMessages(previous);
        if let Some(handle) = self.subscriptions.live_handle(&old_topic).cloned() {
            self.subscriptions.cancel(&handle);
        }
        self.channel_status = FeedStatus::Idle;

        self.models.log.reset();
        self.models.notify_log();
        self.last_search = None;

        if let SessionState::SignedIn { channel: ref mut current, .. } = self.state {
            *current = channel.clone();
        }

        let messages = self.bind_channel(channel).await;
        presence.and(messages)
    }

    /// Redo whatever part of the presence setup failed during sign-in: the
    /// online write, the presence subscription, or both. Does nothing when
    /// both are in place.
    pub async fn recover_presence(&mut self) -> Result<(), SessionError> {
        let user = match self.state {
            SessionState::SignedIn { ref user, .. } => user.clone(),
            SessionState::SignedOut => return Err(SessionError::NotSignedIn),
        };

        if !self.presence_published {
            info!(user = %user.user_id, "Retrying online presence write");
            self.presence_published = self.publish_presence(&user, PresenceStatus::Online).await;
        }

        if self.presence_status == FeedStatus::Live {
            return Ok(());
        }

        info!("Retrying presence subscription");
        self.bind_presence().await
    }

    /// Leave the signed-in state: cancel both feeds, clear the read models
    /// and the cached search, then mark the user offline. The offline write
    /// is best effort.
    pub async fn sign_out(&mut self) -> Result<(), SessionError> {
        let user = match std::mem::replace(&mut self.state, SessionState::SignedOut) {
            SessionState::SignedIn { user, .. } => user,
            SessionState::SignedOut => return Err(SessionError::NotSignedIn),
        };

        info!(user = %user.user_id, "Signing out");

        self.subscriptions.cancel_all();
        self.channel_status = FeedStatus::Idle;
        self.presence_status = FeedStatus::Idle;
        self.presence_published = false;

        self.models.log.reset();
        self.models.presence.clear();
        self.models.notify_log();
        self.models.notify_presence();
        self.last_search = None;

        self.publish_presence(&user, PresenceStatus::Offline).await;
        Ok(())
    }

    // -- messaging ----------------------------------------------------------

    /// Send `text` to the bound channel. The message shows up in the log
    /// right away as an optimistic echo; the returned id is the echo's local
    /// id. If the store does not acknowledge the write the echo stays in the
    /// log marked as failed and [`SessionError::WriteNotAcknowledged`] is
    /// returned.
    pub async fn send_message(&mut self, text: &str) -> Result<MessageId, SessionError> {
        let (user, channel) = match self.state {
            SessionState::SignedIn {
                ref user,
                ref channel,
            } => (user.clone(), channel.clone()),
            SessionState::SignedOut => return Err(SessionError::NotSignedIn),
        };

        let text = normalize_message(text)?;
        let echo = Message::optimistic(channel, &user, text);
        let local_id = echo.id.clone();
        let fields = outgoing_message_fields(&echo);

        if self.models.log.append(echo) {
            self.models.notify_log();
        }

        self.deliver(local_id, fields).await
    }

    /// Retry a message whose write failed.
    pub async fn resend(&mut self, local_id: &MessageId) -> Result<MessageId, SessionError> {
        if !self.is_signed_in() {
            return Err(SessionError::NotSignedIn);
        }

        let fields = match self.models.log.get(local_id) {
            Some(entry) if matches!(entry.delivery, DeliveryState::Failed(_)) => {
                outgoing_message_fields(&entry.message)
            }
            _ => return Err(SessionError::UnknownMessage(local_id.clone())),
        };

        if self.models.log.mark_sending(local_id) {
            self.models.notify_log();
        }

        self.deliver(local_id.clone(), fields).await
    }

    async fn deliver(&mut self, local_id: MessageId, fields: Value) -> Result<MessageId, SessionError> {
        match self.remote.add(Collection::Messages, fields).await {
            Ok(server_id) => {
                debug!(local = %local_id, remote = %server_id, "Message acknowledged");
                if self.models.log.confirm(&local_id, server_id) {
                    self.models.notify_log();
                }
                Ok(local_id)
            }
            Err(source) => {
                warn!(local = %local_id, error = %source, "Message write failed");
                if self.models.log.mark_failed(&local_id, source.to_string()) {
                    self.models.notify_log();
                }
                Err(SessionError::WriteNotAcknowledged { local_id, source })
            }
        }
    }

    // -- search -------------------------------------------------------------

    /// Search the messages currently in the log. Never touches the network.
    pub fn search(&mut self, term: &str) -> SearchOutcome {
        let outcome = search(term, self.models.log.messages());
        self.last_search = Some(LastSearch {
            term: term.to_string(),
            outcome: outcome.clone(),
        });
        outcome
    }

    pub fn last_search(&self) -> Option<&LastSearch> {
        self.last_search.as_ref()
    }

    // -- delivery -----------------------------------------------------------

    /// Wait for the next snapshot and apply it if its subscription is still
    /// current. Returns `false` once no subscription stream is open.
    pub async fn pump(&mut self) -> bool {
        match self.subscriptions.next_delivery().await {
            Some(delivery) => {
                self.subscriptions.dispatch(delivery, &mut self.models);
                true
            }
            None => false,
        }
    }

    /// Apply every snapshot that is already buffered. Returns how many were
    /// applied; superseded ones are dropped and not counted.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(delivery) = self.subscriptions.try_next_delivery() {
            if self.subscriptions.dispatch(delivery, &mut self.models) {
                applied += 1;
            }
        }
        applied
    }

    // -- listeners ----------------------------------------------------------

    pub fn on_message_log_changed(
        &mut self,
        listener: impl FnMut(&MessageLog) + Send + 'static,
    ) -> ListenerId {
        self.models.log_listeners.add(Box::new(listener))
    }

    pub fn on_presence_changed(
        &mut self,
        listener: impl FnMut(&PresenceSet) + Send + 'static,
    ) -> ListenerId {
        self.models.presence_listeners.add(Box::new(listener))
    }

    pub fn remove_message_log_listener(&mut self, id: ListenerId) -> bool {
        self.models.log_listeners.remove(id)
    }

    pub fn remove_presence_listener(&mut self, id: ListenerId) -> bool {
        self.models.presence_listeners.remove(id)
    }

    // -- accessors ----------------------------------------------------------

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.state, SessionState::SignedIn { .. })
    }

    pub fn current_user(&self) -> Option<&LocalProfile> {
        match self.state {
            SessionState::SignedIn { ref user, .. } => Some(user),
            SessionState::SignedOut => None,
        }
    }

    pub fn current_channel(&self) -> Option<&ChannelId> {
        match self.state {
            SessionState::SignedIn { ref channel, .. } => Some(channel),
            SessionState::SignedOut => None,
        }
    }

    pub fn message_log(&self) -> &MessageLog {
        &self.models.log
    }

    pub fn presence(&self) -> &PresenceSet {
        &self.models.presence
    }

    pub fn channel_status(&self) -> &FeedStatus {
        &self.channel_status
    }

    pub fn presence_status(&self) -> &FeedStatus {
        &self.presence_status
    }

    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions.live_count()
    }

    // -- internals ----------------------------------------------------------

    async fn bind_channel(&mut self, channel: ChannelId) -> Result<(), SessionError> {
        let topic = Topic::ChannelMessages(channel.clone());
        let callback: SnapshotCallback<ReadModels> =
            Box::new(move |models: &mut ReadModels, snapshot: Snapshot| {
                models.apply_messages(&channel, snapshot)
            });

        match self.subscriptions.subscribe(topic.clone(), callback).await {
            Ok(handle) => {
                debug!(handle = %handle, "Channel feed bound");
                self.channel_status = FeedStatus::Live;
                Ok(())
            }
            Err(source) => {
                warn!(topic = %topic, error = %source, "Channel subscription failed");
                self.channel_status = FeedStatus::Failed(source.clone());
                Err(SessionError::Subscribe { topic, source })
            }
        }
    }

    async fn bind_presence(&mut self) -> Result<(), SessionError> {
        let callback: SnapshotCallback<ReadModels> =
            Box::new(|models: &mut ReadModels, snapshot: Snapshot| models.apply_presence(snapshot));

        match self.subscriptions.subscribe(Topic::Presence, callback).await {
            Ok(handle) => {
                debug!(handle = %handle, "Presence feed bound");
                self.presence_status = FeedStatus::Live;
                Ok(())
            }
            Err(source) => {
                warn!(error = %source, "Presence subscription failed");
                self.presence_status = FeedStatus::Failed(source.clone());
                Err(SessionError::Subscribe {
                    topic: Topic::Presence,
                    source,
                })
            }
        }
    }

    /// Write the user's presence document. Failures are logged, not returned.
    async fn publish_presence(&self, user: &LocalProfile, status: PresenceStatus) -> bool {
        let fields = PresenceRecord::for_profile(user, status).to_fields();
        let id = DocumentId::new(user.user_id.as_str());

        match self.remote.set(Collection::Users, id, fields).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user = %user.user_id, status = status.as_str(), error = %e, "Failed to publish presence");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agora_hub::{spawn_hub, Faults, HubConfig, HubHandle};
    use agora_shared::remote::Document;
    use agora_shared::types::UserId;
    use agora_shared::ValidationError;
    use serde_json::json;

    async fn session() -> (Arc<HubHandle>, ChatSession<HubHandle>) {
        let hub = Arc::new(spawn_hub(HubConfig::in_memory()).await.unwrap());
        let session = ChatSession::new(hub.clone(), SessionConfig::default());
        (hub, session)
    }

    fn ada() -> LocalProfile {
        LocalProfile::new("u1", "Ada", "ada@example.com")
    }

    #[tokio::test]
    async fn test_operations_require_sign_in() {
        let (_hub, mut session) = session().await;

        assert_eq!(
            session.send_message("hi").await,
            Err(SessionError::NotSignedIn)
        );
        assert_eq!(
            session.switch_channel(ChannelId::new("ideas")).await,
            Err(SessionError::NotSignedIn)
        );
        assert_eq!(session.sign_out().await, Err(SessionError::NotSignedIn));
        assert!(!session.pump().await);
    }

    #[tokio::test]
    async fn test_sign_in_binds_default_channel_and_presence() {
        let (_hub, mut session) = session().await;
        session.sign_in(ada()).await.unwrap();

        assert_eq!(session.current_channel(), Some(&ChannelId::new("general")));
        assert_eq!(session.channel_status(), &FeedStatus::Live);
        assert_eq!(session.presence_status(), &FeedStatus::Live);
        assert_eq!(session.live_subscriptions(), 2);
    }

    #[tokio::test]
    async fn test_double_sign_in_rejected() {
        let (_hub, mut session) = session().await;
        session.sign_in(ada()).await.unwrap();
        assert_eq!(
            session.sign_in(ada()).await,
            Err(SessionError::AlreadySignedIn(ada().user_id))
        );
    }

    #[tokio::test]
    async fn test_blank_message_rejected_locally() {
        let (_hub, mut session) = session().await;
        session.sign_in(ada()).await.unwrap();

        assert_eq!(
            session.send_message("   ").await,
            Err(SessionError::Validation(ValidationError::EmptyText))
        );
        assert!(session.message_log().is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_while_offline_stays_signed_in() {
        let (hub, mut session) = session().await;
        hub.set_faults(Faults::offline()).await.unwrap();

        let err = session.sign_in(ada()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Subscribe {
                topic: Topic::Presence,
                ..
            }
        ));
        assert!(err.is_transient());
        assert!(session.is_signed_in());
        assert!(matches!(session.channel_status(), FeedStatus::Failed(_)));
        assert_eq!(session.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_reselecting_failed_channel_retries() {
        let (hub, mut session) = session().await;
        session.sign_in(ada()).await.unwrap();

        hub.set_faults(Faults::offline()).await.unwrap();
        assert!(session.switch_channel(ChannelId::new("ideas")).await.is_err());
        assert!(matches!(session.channel_status(), FeedStatus::Failed(_)));
        assert_eq!(session.current_channel(), Some(&ChannelId::new("ideas")));

        hub.clear_faults().await.unwrap();
        session.switch_channel(ChannelId::new("ideas")).await.unwrap();
        assert_eq!(session.channel_status(), &FeedStatus::Live);
    }

    #[tokio::test]
    async fn test_search_is_cached_until_channel_switch() {
        let (_hub, mut session) = session().await;
        session.sign_in(ada()).await.unwrap();

        assert_eq!(session.search(""), SearchOutcome::EnterTerm);
        assert_eq!(session.last_search().unwrap().term, "");

        session.switch_channel(ChannelId::new("ideas")).await.unwrap();
        assert!(session.last_search().is_none());
    }

    #[tokio::test]
    async fn test_reselecting_channel_recovers_presence() {
        let (hub, mut session) = session().await;
        hub.set_faults(Faults::offline()).await.unwrap();
        assert!(session.sign_in(ada()).await.is_err());
        assert!(matches!(session.presence_status(), FeedStatus::Failed(_)));

        hub.clear_faults().await.unwrap();
        session.switch_channel(ChannelId::new("general")).await.unwrap();
        assert_eq!(session.presence_status(), &FeedStatus::Live);
        assert_eq!(session.channel_status(), &FeedStatus::Live);
        assert_eq!(session.live_subscriptions(), 2);
        assert_eq!(hub.stats().await.unwrap().users, 1);

        // Both feeds healthy now: a second selection is a no-op.
        session.switch_channel(ChannelId::new("general")).await.unwrap();
        assert_eq!(session.presence_status(), &FeedStatus::Live);
        assert_eq!(session.live_subscriptions(), 2);
    }

    #[tokio::test]
    async fn test_recover_presence_when_healthy_is_noop() {
        let (_hub, mut session) = session().await;
        assert_eq!(
            session.recover_presence().await,
            Err(SessionError::NotSignedIn)
        );

        session.sign_in(ada()).await.unwrap();
        session.recover_presence().await.unwrap();
        assert_eq!(session.presence_status(), &FeedStatus::Live);
        assert_eq!(session.live_subscriptions(), 2);
    }

    fn models() -> ReadModels {
        ReadModels {
            log: MessageLog::default(),
            presence: PresenceSet::new(),
            log_listeners: Listeners::new(),
            presence_listeners: Listeners::new(),
        }
    }

    fn message_doc(id: &str, channel: &str, text: Value) -> Document {
        Document::new(
            DocumentId::new(id),
            json!({
                "channel": channel,
                "authorId": "u2",
                "authorDisplayName": "Bea",
                "authorAvatarUrl": null,
                "text": text,
                "sentAt": "2024-01-01T00:00:00.000000Z",
            }),
        )
    }

    fn user_doc(id: &str, name: &str) -> Document {
        Document::new(
            DocumentId::new(id),
            json!({
                "userId": id,
                "displayName": name,
                "email": format!("{id}@example.com"),
                "avatarUrl": null,
                "status": "online",
            }),
        )
    }

    #[test]
    fn test_malformed_message_documents_are_skipped() {
        let mut models = models();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        models.log_listeners.add(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let snapshot = Snapshot::new(vec![
            message_doc("m1", "ideas", json!("dark theme?")),
            message_doc("m2", "ideas", json!(42)),
            message_doc("m3", "ideas", json!("   ")),
            message_doc("m4", "support", json!("wrong room")),
        ]);
        models.apply_messages(&ChannelId::new("ideas"), snapshot);

        assert_eq!(models.log.len(), 1);
        let kept: Vec<&str> = models.log.messages().map(|m| m.text.as_str()).collect();
        assert_eq!(kept, vec!["dark theme?"]);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_from_other_channel_leaves_log_untouched() {
        let mut models = models();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        models.log_listeners.add(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let snapshot = Snapshot::new(vec![message_doc("m1", "support", json!("hello"))]);
        models.apply_messages(&ChannelId::new("ideas"), snapshot);

        assert!(models.log.is_empty());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_presence_documents_are_skipped() {
        let mut models = models();
        models.presence.set_local_user(Some(UserId::new("u1")));

        let missing_name = Document::new(
            DocumentId::new("u4"),
            json!({ "userId": "u4", "email": "u4@example.com", "status": "online" }),
        );
        let snapshot = Snapshot::new(vec![
            user_doc("u1", "Ada"),
            user_doc("u2", "Bea"),
            missing_name,
            user_doc("u3", "Cai"),
        ]);
        models.apply_presence(snapshot);

        let mut ids: Vec<&str> = models
            .presence
            .entries()
            .iter()
            .map(|e| e.user_id.as_str())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["u2", "u3"]);
    }
}
