//! Database connection management.
//!
//! The [`Store`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. All replicated state is
//! persisted as one JSON blob (see [`crate::state`]); SQLite gives us atomic
//! full-blob replacement and a stable on-disk location for free.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the default application database in the
    /// platform-appropriate data directory.
    pub fn open_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "cercle", "cercle").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("cercle.db");

        tracing::info!(path = %db_path.display(), "opening store");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let store = Store::open_at(&path).expect("should open");
        assert!(store.path().is_some());

        // Reopening runs migrations idempotently.
        drop(store);
        Store::open_at(&path).expect("should reopen");
    }
}
