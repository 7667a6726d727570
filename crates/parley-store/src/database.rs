//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Every named store lives in
//! the single `kv` table, partitioned by its `store` column; values are kept
//! as JSON text.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::kv::Records;
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
///
/// The connection sits behind a mutex so one `Database` can be shared by the
/// named stores through an `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/parley/state.db`
    /// - macOS:   `~/Library/Application Support/org.parley.parley/state.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\parley\parley\data\state.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "parley", "parley").ok_or(StoreError::NoDataDir)?;

        Self::open_in_dir(project_dirs.data_dir())
    }

    /// Open (or create) `state.db` inside `dir`, creating the directory first.
    pub fn open_in_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("state.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the underlying connection.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn()
            .ok()
            .and_then(|conn| conn.path().map(PathBuf::from))
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn kv_get(&self, store: &str, key: &str) -> Result<Option<Value>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv WHERE store = ?1 AND key = ?2",
                params![store, key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Upsert every record in one transaction.
    pub fn kv_set(&self, store: &str, records: &Records) -> Result<()> {
        let mut conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO kv (store, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(store, key) DO UPDATE SET value = excluded.value,
                                                       updated_at = excluded.updated_at",
            )?;
            for (key, value) in records {
                let json = serde_json::to_string(value)?;
                stmt.execute(params![store, key, json, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn kv_get_all(&self, store: &str) -> Result<Vec<Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE store = ?1 ORDER BY key ASC")?;
        let rows = stmt.query_map(params![store], |row| row.get::<_, String>(0))?;

        let mut values = Vec::new();
        for row in rows {
            values.push(serde_json::from_str(&row?)?);
        }
        Ok(values)
    }

    pub fn kv_clear(&self, store: &str) -> Result<usize> {
        let conn = self.conn()?;
        let affected = conn.execute("DELETE FROM kv WHERE store = ?1", params![store])?;
        Ok(affected)
    }
}
