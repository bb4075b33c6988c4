//! SQLite implementation of IKeyValueStore
//!
//! Each key maps to one row of `kv_store`; values are stored as JSON text
//! and `updated_at` as RFC 3339.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use ctxsync_core::ports::IKeyValueStore;

use crate::CacheError;

/// SQLite-backed key/value store
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Creates a new store over the given (already migrated) pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Keys starting with `prefix`, sorted
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let pattern = format!("{}%", escape_like(prefix));
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM kv_store WHERE key LIKE ? ESCAPE '\\' ORDER BY key")
                .bind(pattern)
                .fetch_all(&self.pool)
                .await?;
        Ok(keys)
    }

    async fn read(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        let text = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(text)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait::async_trait]
impl IKeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.read(key).await?)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.write(key, &value).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let removed = self.delete(key).await?;
        debug!(removed, "Removed key");
        Ok(())
    }
}
