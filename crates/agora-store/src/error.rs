use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The platform has no per-user data directory (no home directory).
    #[error("No data directory available for the hub database")]
    NoDataDir,

    /// Creating the database directory failed.
    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    /// A stored body is not valid JSON.
    #[error("Corrupt document body: {0}")]
    Json(#[from] serde_json::Error),

    /// A row names a collection this build does not know about.
    #[error("Unknown collection {0:?}")]
    UnknownCollection(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
