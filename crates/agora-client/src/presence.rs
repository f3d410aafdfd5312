use std::collections::HashMap;

use agora_shared::models::PresenceEntry;
use agora_shared::types::UserId;

/// Users currently online, excluding the local user.
///
/// Like the message log, this is replaced wholesale by each snapshot.
#[derive(Debug, Default)]
pub struct PresenceSet {
    local_user: Option<UserId>,
    users: HashMap<UserId, PresenceEntry>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user to leave out of every snapshot. Setting it also drops that
    /// user from the current contents.
    pub fn set_local_user(&mut self, user: Option<UserId>) {
        if let Some(ref id) = user {
            self.users.remove(id);
        }
        self.local_user = user;
    }

    /// Replace the contents with `entries`. When a user appears more than
    /// once the last entry wins. Returns whether anything changed.
    pub fn apply_snapshot(&mut self, entries: Vec<PresenceEntry>) -> bool {
        let mut users = HashMap::with_capacity(entries.len());
        for entry in entries {
            if self.local_user.as_ref() == Some(&entry.user_id) {
                continue;
            }
            users.insert(entry.user_id.clone(), entry);
        }

        if users == self.users {
            return false;
        }
        self.users = users;
        true
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.users.is_empty();
        self.users.clear();
        self.local_user = None;
        changed
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.users.contains_key(user)
    }

    pub fn get(&self, user: &UserId) -> Option<&PresenceEntry> {
        self.users.get(user)
    }

    /// Entries sorted by display name (case-insensitive), then user id.
    pub fn entries(&self) -> Vec<&PresenceEntry> {
        let mut entries: Vec<&PresenceEntry> = self.users.values().collect();
        entries.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        entries
    }
}
