//! Subcommands and the shared state they are run with

pub mod clear;
pub mod config;
pub mod context;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ctxsync_cache::{DatabasePool, SqliteKeyValueStore};
use ctxsync_core::config::Config;
use ctxsync_core::domain::WorkspaceId;
use ctxsync_core::MetadataStore;

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Global options every subcommand sees
pub struct CommandContext {
    pub config_path: PathBuf,
    pub format: OutputFormat,
}

impl CommandContext {
    pub fn new(config: Option<&str>, format: OutputFormat) -> Self {
        Self {
            config_path: config.map(PathBuf::from).unwrap_or_else(Config::default_path),
            format,
        }
    }

    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format)
    }

    /// The config file if it exists, defaults otherwise
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed
    pub fn load_config(&self) -> Result<Config> {
        if self.config_path.exists() {
            Config::load(&self.config_path)
        } else {
            Ok(Config::default())
        }
    }
}

/// Canonical workspace identity of the configured root
pub(crate) fn workspace_id(config: &Config) -> Result<WorkspaceId> {
    let root = config.workspace_root()?;
    WorkspaceId::new(root).context("Invalid workspace root")
}

/// An opened metadata database
pub(crate) struct OpenedStore {
    pub pool: DatabasePool,
    pub kv: Arc<SqliteKeyValueStore>,
    pub metadata: MetadataStore,
}

/// Open the persisted metadata, or `None` when no database exists yet
pub(crate) async fn open_metadata(config: &Config) -> Result<Option<OpenedStore>> {
    let db_path = config.database_path();
    if !db_path.exists() {
        return Ok(None);
    }
    let pool = DatabasePool::new(&db_path)
        .await
        .context("Failed to open metadata database")?;
    let kv = Arc::new(SqliteKeyValueStore::new(pool.pool().clone()));
    let metadata = MetadataStore::new(kv.clone());
    Ok(Some(OpenedStore { pool, kv, metadata }))
}
