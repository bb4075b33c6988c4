//! ctxsync Cache - Local metadata persistence
//!
//! SQLite-backed implementation of the `IKeyValueStore` port from
//! `ctxsync-core`. The metadata store keeps its per-workspace JSON documents
//! here so change detection survives restarts.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteKeyValueStore`] - `IKeyValueStore` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use ctxsync_cache::{DatabasePool, SqliteKeyValueStore};
//! use ctxsync_core::MetadataStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/ctxsync/ctxsync.db")).await?;
//! let store = MetadataStore::new(Arc::new(SqliteKeyValueStore::new(pool.pool().clone())));
//! # Ok(())
//! # }
//! ```

pub mod kv_store;
pub mod pool;

pub use kv_store::SqliteKeyValueStore;
pub use pool::DatabasePool;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}
