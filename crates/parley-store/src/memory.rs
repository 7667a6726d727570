//! In-memory store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::kv::{KeyValueStore, Records};

/// A [`KeyValueStore`] backed by a `BTreeMap`.
///
/// Counts reads and can be switched into a failing mode, which makes it the
/// store of choice for exercising the state pipeline.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
    reads: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `entries`.
    pub fn with_entries<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self {
            entries: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            ..Self::default()
        }
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `get`/`get_all` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.read().await.clone()
    }

    /// Value currently stored under `key`, bypassing the read counter.
    pub async fn peek(&self, key: &str) -> Option<Value> {
        self.entries.read().await.get(key).cloned()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, records: Records) -> Result<()> {
        self.check_available()?;
        self.entries.write().await.extend(records);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.check_available()?;
        self.entries.write().await.clear();
        Ok(())
    }
}
