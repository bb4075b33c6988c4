//! Key/value store port (driven/secondary port)
//!
//! The metadata store persists JSON documents under string keys. Any store
//! that can round-trip a `serde_json::Value` satisfies the contract.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - A missing key is `Ok(None)`, never an error.
//! - [`InMemoryKeyValueStore`] backs tests and ephemeral runs.

use dashmap::DashMap;
use serde_json::Value;

/// Persisted key/value storage
#[async_trait::async_trait]
pub trait IKeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    ///
    /// # Returns
    /// `None` when the key has never been written or was removed
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Write `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Process-local store backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, Value>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl IKeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
