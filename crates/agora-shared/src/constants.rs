/// Application name
pub const APP_NAME: &str = "Agora";

/// Channel a freshly signed-in session binds to when nothing else is configured
pub const DEFAULT_CHANNEL: &str = "general";

/// Placeholder written in a timestamp field; the remote store replaces it
/// with its own monotonically increasing server time.
pub const SERVER_TIMESTAMP: &str = "__server_timestamp__";

/// Collection names as understood by the remote store
pub const MESSAGES_COLLECTION: &str = "messages";
pub const USERS_COLLECTION: &str = "users";

/// Document field names used by the built-in queries
pub const FIELD_CHANNEL: &str = "channel";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_SENT_AT: &str = "sentAt";

/// Presence status values
pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

/// Maximum message length in characters, after trimming
pub const MAX_MESSAGE_CHARS: usize = 2_000;

/// Window inside which a confirmed record may reconcile an optimistic echo
pub const DEFAULT_RECONCILE_WINDOW_SECS: u64 = 30;

/// Snapshots buffered per subscription before delivery is deferred
pub const DEFAULT_SNAPSHOT_BUFFER: usize = 64;
