//! SQLite-backed named store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::database::Database;
use crate::error::Result;
use crate::kv::{KeyValueStore, Records};

/// One named store inside a shared [`Database`].
///
/// rusqlite is blocking, so every call is moved onto tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    store: Arc<str>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>, store: &str) -> Self {
        Self {
            db,
            store: Arc::from(store),
        }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let db = self.db.clone();
        let store = self.store.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || db.kv_get(&store, &key)).await?
    }

    async fn set(&self, records: Records) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let db = self.db.clone();
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || db.kv_set(&store, &records)).await?
    }

    async fn get_all(&self) -> Result<Vec<Value>> {
        let db = self.db.clone();
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || db.kv_get_all(&store)).await?
    }

    async fn clear(&self) -> Result<()> {
        let db = self.db.clone();
        let store = self.store.clone();
        let removed = tokio::task::spawn_blocking(move || db.kv_clear(&store)).await??;
        tracing::debug!(store = %self.store, removed, "cleared store");
        Ok(())
    }
}
