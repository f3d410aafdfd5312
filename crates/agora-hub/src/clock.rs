//! Server timestamps.
//!
//! Every write gets a timestamp strictly greater than the previous one, even
//! when the wall clock stalls or steps backwards. Timestamps are rendered with
//! fixed microsecond precision so that their string form sorts in time order.

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use serde_json::Value;

use agora_shared::constants::SERVER_TIMESTAMP;

#[derive(Debug, Clone)]
pub struct ServerClock {
    last: Option<DateTime<Utc>>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Next timestamp, strictly after every timestamp handed out or observed.
    pub fn next(&mut self) -> DateTime<Utc> {
        // Rendered at microsecond precision, so compare at that precision too.
        let now = Utc::now().trunc_subsecs(6);
        let ts = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(ts);
        ts
    }

    /// Make sure future timestamps come after `ts` (used when reloading
    /// persisted documents).
    pub fn observe(&mut self, ts: DateTime<Utc>) {
        if self.last.map_or(true, |last| ts > last) {
            self.last = Some(ts);
        }
    }

    /// Replace every top-level [`SERVER_TIMESTAMP`] placeholder in `fields`
    /// with one freshly assigned timestamp.
    pub fn resolve_placeholders(&mut self, fields: &mut Value) {
        let Some(map) = fields.as_object_mut() else {
            return;
        };

        let has_placeholder = map
            .values()
            .any(|v| v.as_str() == Some(SERVER_TIMESTAMP));
        if !has_placeholder {
            return;
        }

        let stamp = Value::String(format_timestamp(self.next()));
        for value in map.values_mut() {
            if value.as_str() == Some(SERVER_TIMESTAMP) {
                *value = stamp.clone();
            }
        }
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
