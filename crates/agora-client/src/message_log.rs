//! Ordered, deduplicated message cache for the active channel.
//!
//! The confirmed part of the log is a pure function of the latest snapshot:
//! every [`MessageLog::apply_snapshot`] replaces it wholesale. Optimistic
//! echoes of messages the local user sent are kept beside it until a snapshot
//! carries the matching confirmed record, or the log is reset.
//!
//! Order is `sent_at` ascending (pending last), ties broken by the order in
//! which each message id was first seen. That first-seen number survives
//! re-deliveries of the same id, so repeated snapshots never reshuffle ties.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use agora_shared::models::Message;
use agora_shared::types::{DocumentId, MessageId, SentAt};

/// How far a log entry has progressed towards the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum DeliveryState {
    /// Authoritative record from a snapshot.
    Confirmed,
    /// Optimistic echo whose write has not been reconciled yet.
    Sending,
    /// Optimistic echo whose write was not acknowledged.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub message: Message,
    pub delivery: DeliveryState,
}

#[derive(Debug, Clone)]
struct Confirmed {
    arrival: u64,
    message: Message,
}

#[derive(Debug, Clone)]
struct Echo {
    arrival: u64,
    message: Message,
    delivery: DeliveryState,
    created_at: DateTime<Utc>,
    /// Id the store assigned, once the write was acknowledged.
    server_id: Option<DocumentId>,
}

#[derive(Debug)]
pub struct MessageLog {
    confirmed: Vec<Confirmed>,
    echoes: Vec<Echo>,
    arrivals: HashMap<DocumentId, u64>,
    next_arrival: u64,
    reconcile_window: Duration,
    view: Vec<LogEntry>,
}

impl MessageLog {
    pub fn new(reconcile_window: Duration) -> Self {
        Self {
            confirmed: Vec::new(),
            echoes: Vec::new(),
            arrivals: HashMap::new(),
            next_arrival: 0,
            reconcile_window,
            view: Vec::new(),
        }
    }

    /// Drop everything, for a fresh channel binding or sign-out.
    pub fn reset(&mut self) {
        self.confirmed.clear();
        self.echoes.clear();
        self.arrivals.clear();
        self.next_arrival = 0;
        self.view.clear();
    }

    /// Replace the confirmed messages with `records`, the full current result
    /// set for the channel. Returns whether the visible log changed.
    pub fn apply_snapshot(&mut self, records: Vec<Message>) -> bool {
        let mut seen: HashSet<DocumentId> = HashSet::with_capacity(records.len());
        let mut fresh: HashSet<DocumentId> = HashSet::new();
        let mut confirmed = Vec::with_capacity(records.len());

        for message in records {
            let Some(id) = message.id.as_remote().cloned() else {
                warn!(id = %message.id, "Ignoring record without a store id");
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }

            let arrival = match self.arrivals.get(&id) {
                Some(arrival) => *arrival,
                None => {
                    fresh.insert(id.clone());
                    self.next_arrival += 1;
                    self.arrivals.insert(id, self.next_arrival);
                    self.next_arrival
                }
            };
            confirmed.push(Confirmed { arrival, message });
        }

        // Forget ids that were retracted upstream.
        self.arrivals.retain(|id, _| seen.contains(id));
        self.confirmed = confirmed;

        self.reconcile(&fresh);
        self.rebuild()
    }

    /// Show a message right away, before the store has confirmed it.
    pub fn append(&mut self, message: Message) -> bool {
        self.append_at(message, Utc::now())
    }

    /// [`Self::append`] with an explicit local send time.
    pub fn append_at(&mut self, message: Message, created_at: DateTime<Utc>) -> bool {
        if !message.id.is_local() {
            warn!(id = %message.id, "Optimistic echo must carry a local id");
            return false;
        }
        if self.echoes.iter().any(|e| e.message.id == message.id) {
            return false;
        }

        self.next_arrival += 1;
        self.echoes.push(Echo {
            arrival: self.next_arrival,
            message,
            delivery: DeliveryState::Sending,
            created_at,
            server_id: None,
        });
        self.rebuild()
    }

    /// Record the id the store assigned to an echo's write. If a snapshot
    /// already carried that record, the echo is retired immediately.
    pub fn confirm(&mut self, local_id: &MessageId, server_id: DocumentId) -> bool {
        let Some(pos) = self.echoes.iter().position(|e| &e.message.id == local_id) else {
            return false;
        };

        if self.arrivals.contains_key(&server_id) {
            debug!(local = %local_id, remote = %server_id, "Echo already confirmed by snapshot");
            self.echoes.remove(pos);
            return self.rebuild();
        }

        let echo = &mut self.echoes[pos];
        echo.server_id = Some(server_id);
        echo.delivery = DeliveryState::Sending;
        self.rebuild()
    }

    /// Flag an echo whose write failed.
    pub fn mark_failed(&mut self, local_id: &MessageId, reason: impl Into<String>) -> bool {
        let Some(echo) = self.echoes.iter_mut().find(|e| &e.message.id == local_id) else {
            return false;
        };
        echo.delivery = DeliveryState::Failed(reason.into());
        self.rebuild()
    }

    /// Put a failed echo back into the sending state for a retry.
    pub fn mark_sending(&mut self, local_id: &MessageId) -> bool {
        let Some(echo) = self.echoes.iter_mut().find(|e| &e.message.id == local_id) else {
            return false;
        };
        echo.delivery = DeliveryState::Sending;
        echo.created_at = Utc::now();
        self.rebuild()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.view
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.view.iter().map(|entry| &entry.message)
    }

    pub fn get(&self, id: &MessageId) -> Option<&LogEntry> {
        self.view.iter().find(|entry| &entry.message.id == id)
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    /// Whether the "no messages" state should be shown.
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.echoes.len()
    }

    /// Retire echoes whose confirmed record is now present. Matching by the
    /// acknowledged id comes first; the author/channel/text heuristic only
    /// considers records first seen in this snapshot, and each record
    /// retires at most one echo.
    fn reconcile(&mut self, fresh: &HashSet<DocumentId>) {
        if self.echoes.is_empty() {
            return;
        }

        let mut claimed: HashSet<DocumentId> = HashSet::new();
        let mut retired: HashSet<MessageId> = HashSet::new();

        for echo in &self.echoes {
            if let Some(ref server_id) = echo.server_id {
                if self.arrivals.contains_key(server_id) {
                    claimed.insert(server_id.clone());
                    retired.insert(echo.message.id.clone());
                }
            }
        }

        let window = chrono::Duration::from_std(self.reconcile_window)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

        let mut order: Vec<&Echo> = self
            .echoes
            .iter()
            .filter(|e| !retired.contains(&e.message.id))
            .filter(|e| e.delivery == DeliveryState::Sending && e.server_id.is_none())
            .collect();
        order.sort_by_key(|e| e.arrival);

        for echo in order {
            let hit = self.confirmed.iter().find(|c| {
                let Some(id) = c.message.id.as_remote() else {
                    return false;
                };
                fresh.contains(id)
                    && !claimed.contains(id)
                    && c.message.author_id == echo.message.author_id
                    && c.message.channel == echo.message.channel
                    && c.message.text == echo.message.text
                    && within_window(&c.message.sent_at, echo.created_at, window)
            });

            if let Some(hit) = hit {
                if let Some(id) = hit.message.id.as_remote() {
                    claimed.insert(id.clone());
                }
                retired.insert(echo.message.id.clone());
            }
        }

        if !retired.is_empty() {
            debug!(count = retired.len(), "Reconciled optimistic echoes");
            self.echoes.retain(|e| !retired.contains(&e.message.id));
        }
    }

    /// Recompute the ordered view. Returns whether it differs from before.
    fn rebuild(&mut self) -> bool {
        let mut keyed: Vec<(SentAt, u64, LogEntry)> = self
            .confirmed
            .iter()
            .map(|c| {
                (
                    c.message.sent_at,
                    c.arrival,
                    LogEntry {
                        message: c.message.clone(),
                        delivery: DeliveryState::Confirmed,
                    },
                )
            })
            .chain(self.echoes.iter().map(|e| {
                (
                    e.message.sent_at,
                    e.arrival,
                    LogEntry {
                        message: e.message.clone(),
                        delivery: e.delivery.clone(),
                    },
                )
            }))
            .collect();

        keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let view: Vec<LogEntry> = keyed.into_iter().map(|(_, _, entry)| entry).collect();
        let changed = view != self.view;
        self.view = view;
        changed
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(
            agora_shared::constants::DEFAULT_RECONCILE_WINDOW_SECS,
        ))
    }
}

fn within_window(sent_at: &SentAt, created_at: DateTime<Utc>, window: chrono::Duration) -> bool {
    match sent_at {
        SentAt::At(ts) => {
            let diff = *ts - created_at;
            diff <= window && -diff <= window
        }
        // The store has not stamped it yet, so it can only be recent.
        SentAt::Pending => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::models::LocalProfile;
    use agora_shared::types::{ChannelId, UserId};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, secs: i64, text: &str) -> Message {
        Message {
            id: MessageId::Remote(DocumentId::new(id)),
            channel: ChannelId::new("ideas"),
            author_id: UserId::new("u1"),
            author_display_name: "Ada".into(),
            author_avatar_url: None,
            text: text.into(),
            sent_at: SentAt::At(at(secs)),
        }
    }

    fn ids(log: &MessageLog) -> Vec<String> {
        log.messages().map(|m| m.id.to_string()).collect()
    }

    fn profile() -> LocalProfile {
        LocalProfile::new("u1", "Ada", "ada@example.com")
    }

    #[test]
    fn test_snapshot_sorted_by_sent_at() {
        let mut log = MessageLog::default();
        log.apply_snapshot(vec![msg("c", 30, "c"), msg("a", 10, "a"), msg("b", 20, "b")]);
        assert_eq!(ids(&log), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_identical_snapshot_is_unobservable() {
        let mut log = MessageLog::default();
        let snapshot = vec![msg("a", 10, "a"), msg("b", 20, "b")];

        assert!(log.apply_snapshot(snapshot.clone()));
        let first = log.entries().to_vec();

        assert!(!log.apply_snapshot(snapshot));
        assert_eq!(log.entries(), first.as_slice());
    }

    #[test]
    fn test_duplicate_ids_in_one_snapshot_collapse() {
        let mut log = MessageLog::default();
        log.apply_snapshot(vec![msg("a", 10, "a"), msg("a", 10, "a")]);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_ties_keep_first_seen_order_across_redelivery() {
        let mut log = MessageLog::default();
        log.apply_snapshot(vec![msg("x", 10, "x")]);
        log.apply_snapshot(vec![msg("y", 10, "y"), msg("x", 10, "x")]);
        assert_eq!(ids(&log), vec!["x", "y"]);

        // Re-delivered in the opposite order, still stable.
        log.apply_snapshot(vec![msg("x", 10, "x"), msg("y", 10, "y")]);
        assert_eq!(ids(&log), vec!["x", "y"]);
    }

    #[test]
    fn test_log_reflects_only_latest_snapshot() {
        let mut log = MessageLog::default();
        log.apply_snapshot(vec![msg("a", 10, "a"), msg("b", 20, "b")]);
        log.apply_snapshot(vec![msg("b", 20, "b")]);
        assert_eq!(ids(&log), vec!["b"]);

        assert!(log.apply_snapshot(Vec::new()));
        assert!(log.is_empty());
    }

    #[test]
    fn test_echo_sorts_last_and_is_sending() {
        let mut log = MessageLog::default();
        log.apply_snapshot(vec![msg("a", 10, "a")]);

        let echo = Message::optimistic(ChannelId::new("ideas"), &profile(), "hi".into());
        let local_id = echo.id.clone();
        assert!(log.append(echo));

        let last = log.entries().last().unwrap();
        assert_eq!(last.message.id, local_id);
        assert_eq!(last.delivery, DeliveryState::Sending);
    }

    #[test]
    fn test_echo_reconciled_by_heuristic() {
        let mut log = MessageLog::default();
        let echo = Message::optimistic(ChannelId::new("ideas"), &profile(), "hello".into());
        log.append_at(echo, at(100));

        log.apply_snapshot(vec![msg("srv", 101, "hello")]);
        assert_eq!(log.len(), 1);
        assert_eq!(log.pending_count(), 0);
        assert_eq!(log.entries()[0].delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn test_echo_outside_window_not_reconciled() {
        let mut log = MessageLog::new(Duration::from_secs(5));
        let echo = Message::optimistic(ChannelId::new("ideas"), &profile(), "hello".into());
        log.append_at(echo, at(100));

        log.apply_snapshot(vec![msg("srv", 200, "hello")]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.pending_count(), 1);
    }

    #[test]
    fn test_previously_seen_record_does_not_reconcile() {
        let mut log = MessageLog::default();
        log.apply_snapshot(vec![msg("old", 99, "hello")]);

        let echo = Message::optimistic(ChannelId::new("ideas"), &profile(), "hello".into());
        log.append_at(echo, at(100));
        log.apply_snapshot(vec![msg("old", 99, "hello")]);

        assert_eq!(log.pending_count(), 1);
    }

    #[test]
    fn test_one_record_reconciles_one_echo() {
        let mut log = MessageLog::default();
        let first = Message::optimistic(ChannelId::new("ideas"), &profile(), "same".into());
        let second = Message::optimistic(ChannelId::new("ideas"), &profile(), "same".into());
        let second_id = second.id.clone();
        log.append_at(first, at(100));
        log.append_at(second, at(101));

        log.apply_snapshot(vec![msg("srv1", 100, "same")]);
        assert_eq!(log.pending_count(), 1);
        assert!(log.get(&second_id).is_some());

        log.apply_snapshot(vec![msg("srv1", 100, "same"), msg("srv2", 101, "same")]);
        assert_eq!(log.pending_count(), 0);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_confirm_before_snapshot_matches_by_id() {
        let mut log = MessageLog::new(Duration::from_secs(0));
        let echo = Message::optimistic(ChannelId::new("ideas"), &profile(), "hi".into());
        let local_id = echo.id.clone();
        log.append_at(echo, at(0));

        log.confirm(&local_id, DocumentId::new("srv"));
        // Far outside the window, but the id is known.
        log.apply_snapshot(vec![msg("srv", 3_600, "hi")]);
        assert_eq!(log.pending_count(), 0);
        assert_eq!(ids(&log), vec!["srv"]);
    }

    #[test]
    fn test_confirm_after_snapshot_retires_echo() {
        let mut log = MessageLog::new(Duration::from_secs(0));
        let echo = Message::optimistic(ChannelId::new("ideas"), &profile(), "hi".into());
        let local_id = echo.id.clone();
        log.append_at(echo, at(0));

        log.apply_snapshot(vec![msg("srv", 3_600, "hi")]);
        assert_eq!(log.len(), 2);

        assert!(log.confirm(&local_id, DocumentId::new("srv")));
        assert_eq!(ids(&log), vec!["srv"]);
    }

    #[test]
    fn test_failed_echo_stays_visible() {
        let mut log = MessageLog::default();
        let echo = Message::optimistic(ChannelId::new("ideas"), &profile(), "hi".into());
        let local_id = echo.id.clone();
        log.append(echo);

        assert!(log.mark_failed(&local_id, "quota exceeded"));
        assert_eq!(
            log.get(&local_id).unwrap().delivery,
            DeliveryState::Failed("quota exceeded".into())
        );

        // A failed write never reached the store, so a lookalike record
        // does not retire it.
        log.apply_snapshot(vec![Message {
            sent_at: SentAt::At(Utc::now()),
            ..msg("other", 0, "hi")
        }]);
        assert_eq!(log.pending_count(), 1);

        assert!(log.mark_sending(&local_id));
        assert_eq!(log.get(&local_id).unwrap().delivery, DeliveryState::Sending);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut log = MessageLog::default();
        log.apply_snapshot(vec![msg("a", 10, "a")]);
        log.append(Message::optimistic(ChannelId::new("ideas"), &profile(), "x".into()));

        log.reset();
        assert!(log.is_empty());
        assert_eq!(log.pending_count(), 0);
    }

    #[test]
    fn test_append_rejects_remote_ids() {
        let mut log = MessageLog::default();
        assert!(!log.append(msg("a", 10, "a")));
        assert!(log.is_empty());
    }
}
