//! Session configuration loaded from environment variables.

use std::time::Duration;

use agora_shared::constants::{DEFAULT_CHANNEL, DEFAULT_RECONCILE_WINDOW_SECS};
use agora_shared::types::ChannelId;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Channel bound right after sign-in.
    /// Env: `AGORA_DEFAULT_CHANNEL`
    /// Default: `general`
    pub default_channel: ChannelId,

    /// How far apart an optimistic echo and its confirmed record may be in
    /// time and still be reconciled.
    /// Env: `AGORA_RECONCILE_WINDOW_SECS`
    /// Default: `30`
    pub reconcile_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_channel: ChannelId::new(DEFAULT_CHANNEL),
            reconcile_window: Duration::from_secs(DEFAULT_RECONCILE_WINDOW_SECS),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(channel) = std::env::var("AGORA_DEFAULT_CHANNEL") {
            let channel = channel.trim();
            if channel.is_empty() {
                tracing::warn!("Empty AGORA_DEFAULT_CHANNEL, using default");
            } else {
                config.default_channel = ChannelId::new(channel);
            }
        }

        if let Ok(val) = std::env::var("AGORA_RECONCILE_WINDOW_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => config.reconcile_window = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid AGORA_RECONCILE_WINDOW_SECS, using default");
                }
            }
        }

        config
    }

    pub fn with_default_channel(mut self, channel: impl Into<String>) -> Self {
        self.default_channel = ChannelId::new(channel);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.default_channel, ChannelId::new("general"));
        assert_eq!(config.reconcile_window, Duration::from_secs(30));
    }

    #[test]
    fn test_with_default_channel() {
        let config = SessionConfig::default().with_default_channel("ideas");
        assert_eq!(config.default_channel.as_str(), "ideas");
    }
}
