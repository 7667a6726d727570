//! The storage contract.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A batch of key/value pairs written together.
pub type Records = BTreeMap<String, Value>;

/// Asynchronous per-key storage over one named store.
///
/// Writes are trust-on-send: nothing reads a value back to verify it. A key
/// that was never written reads as `None`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a single key.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write every record in the batch.
    async fn set(&self, records: Records) -> Result<()>;

    /// Every value in the store, ordered by key.
    async fn get_all(&self) -> Result<Vec<Value>>;

    /// Drop every record in the store.
    async fn clear(&self) -> Result<()>;
}

/// Shorthand for a single-record batch.
pub fn record(key: impl Into<String>, value: Value) -> Records {
    let mut records = Records::new();
    records.insert(key.into(), value);
    records
}
