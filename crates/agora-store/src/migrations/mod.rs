//! Schema migrations, tracked with `PRAGMA user_version`.
//!
//! Every migration in [`MIGRATIONS`] whose version is above the stored one is
//! applied in order when a [`crate::Database`] is opened.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Up = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

/// `(version, name, up)` in ascending version order.
const MIGRATIONS: &[(u32, &str, Up)] = &[(1, "v001_initial", v001_initial::up)];

/// Schema version after all migrations ran.
pub const CURRENT_VERSION: u32 = 1;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let stored: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if stored > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{stored} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    for &(version, name, up) in MIGRATIONS.iter().filter(|(v, _, _)| *v > stored) {
        tracing::info!(version, name, "applying migration");
        up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
