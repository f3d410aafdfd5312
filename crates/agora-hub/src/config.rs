//! Hub configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the hub can start with zero
//! configuration in tests and local development.

use std::path::PathBuf;
use std::time::Duration;

use agora_shared::constants::DEFAULT_SNAPSHOT_BUFFER;
use agora_store::Database;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// SQLite file used to persist documents. `None` keeps everything in memory.
    /// Env: `AGORA_HUB_DB_PATH` (`default` picks the platform data directory)
    pub database_path: Option<PathBuf>,

    /// Snapshots buffered per subscription before delivery is deferred.
    /// Env: `AGORA_SNAPSHOT_BUFFER`
    /// Default: `64`
    pub snapshot_buffer: usize,

    /// Capacity of the command channel into the hub task.
    /// Env: `AGORA_HUB_COMMAND_BUFFER`
    /// Default: `256`
    pub command_buffer: usize,

    /// How often deferred snapshots are retried for subscribers whose buffer
    /// was full.
    pub redeliver_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            snapshot_buffer: DEFAULT_SNAPSHOT_BUFFER,
            command_buffer: 256,
            redeliver_interval: Duration::from_millis(50),
        }
    }
}

impl HubConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("AGORA_HUB_DB_PATH") {
            if path == "default" {
                match Database::default_path() {
                    Ok(path) => config.database_path = Some(path),
                    Err(e) => tracing::warn!(error = %e, "No data directory, hub stays in memory"),
                }
            } else if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(n) = parse_positive("AGORA_SNAPSHOT_BUFFER") {
            config.snapshot_buffer = n;
        }

        if let Some(n) = parse_positive("AGORA_HUB_COMMAND_BUFFER") {
            config.command_buffer = n;
        }

        config
    }

    /// Memory-only hub, the usual choice for tests.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }
}

fn parse_positive(var: &str) -> Option<usize> {
    let value = std::env::var(var).ok()?;
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(var, value = %value, "Invalid value, using default");
            None
        }
    }
}
