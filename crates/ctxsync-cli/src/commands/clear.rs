//! Clear command - Forget persisted metadata for the workspace
//!
//! The next scan treats every file as new and uploads it again.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::commands::{open_metadata, workspace_id, CommandContext};

#[derive(Debug, Args)]
pub struct ClearCommand {
    /// Skip the confirmation notice
    #[arg(long, short)]
    pub yes: bool,
}

impl ClearCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config()?;
        let workspace = workspace_id(&config)?;

        if !self.yes {
            formatter.warn(&format!(
                "This forgets every record for {}. Re-run with --yes to proceed.",
                workspace
            ));
            return Ok(());
        }

        let Some(opened) = open_metadata(&config).await? else {
            formatter.success("No metadata database, nothing to clear");
            return Ok(());
        };

        let count = opened
            .metadata
            .get_all(&workspace)
            .await
            .context("Failed to read file metadata")?
            .len();
        opened
            .metadata
            .clear(&workspace)
            .await
            .context("Failed to clear metadata")?;
        opened.pool.close().await;
        info!(workspace = %workspace, records = count, "Cleared metadata");

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "workspace": workspace.as_path().display().to_string(),
                "cleared": count,
            }));
        } else {
            formatter.success(&format!("Cleared {count} record(s) for {workspace}"));
        }
        Ok(())
    }
}
