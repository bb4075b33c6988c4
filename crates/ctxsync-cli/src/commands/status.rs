//! Status command - Display tracking and sync status
//!
//! Reads the persisted metadata of the configured workspace without starting
//! a tracker, so it reflects what the daemon last recorded.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use ctxsync_core::domain::{FileMetadata, WorkspaceId};
use ctxsync_core::metadata::FILE_METADATA_PREFIX;
use tracing::info;

use crate::commands::{open_metadata, workspace_id, CommandContext};
use crate::output::OutputFormatter;

/// Most pending paths listed in human output
const PENDING_LIST_LIMIT: usize = 20;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Show the record of a single file instead of the workspace summary
    pub path: Option<String>,
}

/// Workspace counters derived from stored records
#[derive(Debug, PartialEq)]
struct StatusReport {
    tracked: usize,
    synced: usize,
    pending: Vec<String>,
}

impl StatusReport {
    fn from_records(records: &[FileMetadata], workspace_last_sync: DateTime<Utc>) -> Self {
        let mut pending: Vec<String> = records
            .iter()
            .filter(|m| m.needs_sync(workspace_last_sync))
            .map(|m| m.path.display().to_string())
            .collect();
        pending.sort();
        Self {
            tracked: records.len(),
            synced: records.iter().filter(|m| m.last_synced_at.is_some()).count(),
            pending,
        }
    }
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;
        let workspace = workspace_id(&config)?;

        let Some(opened) = open_metadata(&config).await? else {
            formatter.error("No metadata database found. Start ctxsyncd or run 'ctxsync sync' first.");
            return Ok(());
        };

        let records = opened
            .metadata
            .get_all(&workspace)
            .await
            .context("Failed to read file metadata")?;
        let state = opened
            .metadata
            .workspace_state(&workspace)
            .await
            .context("Failed to read workspace state")?;
        let workspaces = opened
            .kv
            .keys_with_prefix(FILE_METADATA_PREFIX)
            .await
            .context("Failed to list workspaces")?
            .len();
        opened.pool.close().await;

        info!(workspace = %workspace, records = records.len(), "Showing status");

        match &self.path {
            Some(path) => self.show_file(&workspace, &records, path, ctx, &*formatter),
            None => {
                let last = state.has_synced().then_some(state.last_sync_timestamp);
                let report = StatusReport::from_records(&records, state.last_sync_timestamp);
                show_summary(&workspace, last, workspaces, &report, ctx, &*formatter);
                Ok(())
            }
        }
    }

    fn show_file(
        &self,
        workspace: &WorkspaceId,
        records: &[FileMetadata],
        path: &str,
        ctx: &CommandContext,
        formatter: &dyn OutputFormatter,
    ) -> Result<()> {
        let path = Path::new(path);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            workspace.as_path().join(path)
        };

        let Some(record) = records.iter().find(|m| m.path == absolute) else {
            formatter.error(&format!("{} is not tracked", absolute.display()));
            return Ok(());
        };

        if ctx.format.is_json() {
            let json = serde_json::to_value(record).context("Failed to serialize record")?;
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success(&absolute.display().to_string());
        formatter.info(&format!("Hash: {}", record.content_hash));
        formatter.info(&format!(
            "Modified: {}",
            record.last_modified_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        match record.last_synced_at {
            Some(at) => formatter.info(&format!("Synced: {}", at.format("%Y-%m-%d %H:%M:%S UTC"))),
            None => formatter.info("Synced: Never"),
        }
        Ok(())
    }
}

fn show_summary(
    workspace: &WorkspaceId,
    last_sync: Option<DateTime<Utc>>,
    workspaces: usize,
    report: &StatusReport,
    ctx: &CommandContext,
    formatter: &dyn OutputFormatter,
) {
    if ctx.format.is_json() {
        formatter.print_json(&serde_json::json!({
            "workspace": workspace.as_path().display().to_string(),
            "last_sync": last_sync.map(|t| t.to_rfc3339()),
            "tracked": report.tracked,
            "synced": report.synced,
            "pending": report.pending,
            "workspaces_in_database": workspaces,
        }));
        return;
    }

    formatter.success(&format!("ctxsync Status - {}", workspace.as_path().display()));
    formatter.info("");
    match last_sync {
        Some(t) => formatter.info(&format!("Last write: {}", t.format("%Y-%m-%d %H:%M:%S UTC"))),
        None => formatter.info("Last write: Never"),
    }
    formatter.info(&format!("Tracked files: {}", report.tracked));
    formatter.info(&format!("Synced at least once: {}", report.synced));
    formatter.info(&format!("Pending upload: {}", report.pending.len()));
    formatter.info(&format!("Workspaces in database: {workspaces}"));

    if !report.pending.is_empty() {
        formatter.info("");
        for path in report.pending.iter().take(PENDING_LIST_LIMIT) {
            formatter.info(&format!("  {path}"));
        }
        if report.pending.len() > PENDING_LIST_LIMIT {
            formatter.info(&format!(
                "  ... and {} more",
                report.pending.len() - PENDING_LIST_LIMIT
            ));
        }
    }
}
