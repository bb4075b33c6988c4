//! SQLite pool setup and schema versioning
//!
//! The schema version lives in `PRAGMA user_version`; each entry of
//! [`MIGRATIONS`] above the stored version is applied in order, inside one
//! transaction per step.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Row};
use tracing::{debug, info};

use crate::CacheError;

/// Ordered schema steps; the index + 1 is the version a step produces
const MIGRATIONS: &[&str] = &[include_str!("migrations/20261017_initial.sql")];

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Migrated connection pool for the key/value database
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Open the database file at `db_path`, creating it and its directory if needed
    ///
    /// # Errors
    /// `CacheError::ConnectionFailed` when the file cannot be opened,
    /// `CacheError::MigrationFailed` when the schema cannot be brought up to date
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                CacheError::ConnectionFailed(format!("Cannot create {}: {e}", dir.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Cannot open {}: {e}", db_path.display()))
            })?;

        let version = migrate(&pool).await?;
        info!(path = %db_path.display(), schema_version = version, "Opened metadata database");
        Ok(Self { pool })
    }

    /// A private in-memory database, for tests and dry runs
    ///
    /// Limited to one connection: each in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("In-memory database: {e}")))?;
        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current schema version of the open database
    pub async fn schema_version(&self) -> Result<i64, CacheError> {
        user_version(&self.pool).await
    }

    /// Wait for connections to be returned and close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn user_version(pool: &SqlitePool) -> Result<i64, CacheError> {
    let row = sqlx::query("PRAGMA user_version").fetch_one(pool).await?;
    Ok(row.try_get::<i64, _>(0)?)
}

/// Apply every pending step and return the resulting version
async fn migrate(pool: &SqlitePool) -> Result<i64, CacheError> {
    let current = user_version(pool).await?;
    let target = MIGRATIONS.len() as i64;

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
        let version = index as i64 + 1;
        let failed = |e: sqlx::Error| CacheError::MigrationFailed(format!("step {version}: {e}"));

        let mut tx = pool.begin().await.map_err(failed)?;
        (&mut *tx).execute(sqlx::raw_sql(sql)).await.map_err(failed)?;
        // PRAGMA does not take bind parameters
        (&mut *tx)
            .execute(sqlx::raw_sql(&format!("PRAGMA user_version = {version}")))
            .await
            .map_err(failed)?;
        tx.commit().await.map_err(failed)?;
        debug!(version, "Applied schema migration");
    }

    Ok(current.max(target))
}
