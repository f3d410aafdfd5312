//! Opening the hub's SQLite file. A [`Database`] is only handed out after the
//! schema migrations ran on its connection.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// One migrated SQLite connection. Not `Sync`; the hub task owns it.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Platform-appropriate location of the hub database:
    /// - Linux:   `~/.local/share/agora/hub.db`
    /// - macOS:   `~/Library/Application Support/org.agora.agora/hub.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\agora\agora\data\hub.db`
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("org", "agora", "agora").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("hub.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open a throwaway in-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// File backing the connection; `None` for in-memory databases.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_at_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());

        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[test]
    fn test_default_path_names_hub_file() {
        if let Ok(path) = Database::default_path() {
            assert!(path.ends_with("hub.db"));
        }
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("hub.db");

        Database::open_at(&path).expect("should open");
        assert!(path.exists());
    }
}
