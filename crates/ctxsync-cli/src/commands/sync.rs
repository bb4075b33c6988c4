//! Sync command - Upload pending files once
//!
//! Provides the `ctxsync sync` CLI command which:
//! 1. Loads configuration and opens the metadata database
//! 2. Scans the workspace against the stored records
//! 3. Uploads whatever is pending, waiting out transient retries
//! 4. Reports how many files the service acknowledged

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use ctxsync_cache::{DatabasePool, SqliteKeyValueStore};
use ctxsync_remote::HttpUploader;
use ctxsync_sync::{ContextIndex, SyncOutcome, WatchMode};
use tracing::{debug, info};

use crate::commands::CommandContext;

const SESSION_ENV: &str = "CTXSYNC_SESSION_ID";
const TOKEN_ENV: &str = "CTXSYNC_AUTH_TOKEN";

/// How often a busy coordinator is polled
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Session to upload to (overrides CTXSYNC_SESSION_ID and the config)
    #[arg(long)]
    pub session: Option<String>,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let mut config = ctx.load_config()?;

        if let Some(session) = self
            .session
            .clone()
            .or_else(|| std::env::var(SESSION_ENV).ok().filter(|s| !s.is_empty()))
        {
            config.remote.session_id = Some(session);
        }
        if let Some(token) = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()) {
            config.remote.auth_token = Some(token);
        }
        let Some(session) = config.remote.session_id.clone() else {
            formatter.error("No session id. Pass --session or set remote.session_id.");
            return Ok(());
        };

        let db = DatabasePool::new(&config.database_path())
            .await
            .context("Failed to open metadata database")?;
        let store = Arc::new(SqliteKeyValueStore::new(db.pool().clone()));
        let uploader = Arc::new(HttpUploader::from_config(&config.remote)?);

        let started = Utc::now();
        let index = ContextIndex::start(&config, store, uploader, WatchMode::EditorOnly).await?;
        let pending_before = index.tracker().pending_count().await;
        info!(session = %session, pending = pending_before, "Running one-shot sync");

        // Generous upper bound: every retry plus one request timeout each
        let attempts = config.sync.max_retries + 1;
        let deadline = Duration::from_millis(config.sync.retry_delay_ms)
            .saturating_add(Duration::from_secs(config.remote.timeout_secs))
            .saturating_mul(attempts)
            .saturating_add(Duration::from_secs(5));

        let outcome = tokio::time::timeout(deadline, settle(&index)).await;

        let uploaded = index
            .tracker()
            .snapshot()
            .await
            .iter()
            .filter(|m| m.last_synced_at.is_some_and(|at| at >= started))
            .count();
        let remaining = index.tracker().pending_count().await;
        index.dispose().await;
        db.close().await;

        let failure = match &outcome {
            Err(_) => Some("timed out waiting for the service".to_string()),
            Ok(SyncOutcome::Dropped { reason, .. }) => Some(reason.clone()),
            Ok(_) if uploaded < pending_before && remaining == 0 => {
                Some("batch dropped after retries, see logs".to_string())
            }
            Ok(_) => None,
        };

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": failure.is_none(),
                "session": session,
                "uploaded": uploaded,
                "pending": remaining,
                "error": failure,
            }));
            return Ok(());
        }

        match failure {
            None if uploaded == 0 => formatter.success("Nothing to sync"),
            None => formatter.success(&format!("Uploaded {uploaded} file(s) to session {session}")),
            Some(reason) => formatter.error(&format!("Sync failed: {reason}")),
        }
        if remaining > 0 {
            formatter.warn(&format!("{remaining} file(s) still pending"));
        }
        Ok(())
    }
}

/// Drive the coordinator until a cycle finishes without a retry in flight
async fn settle(index: &ContextIndex) -> SyncOutcome {
    loop {
        let outcome = index.sync_now().await;
        debug!(outcome = ?outcome, "Sync attempt");
        match outcome {
            SyncOutcome::Busy => tokio::time::sleep(POLL_INTERVAL).await,
            SyncOutcome::Retrying { delay, .. } => tokio::time::sleep(delay + POLL_INTERVAL).await,
            SyncOutcome::Synced { .. } if index.tracker().pending_count().await > 0 => {}
            done => return done,
        }
    }
}
