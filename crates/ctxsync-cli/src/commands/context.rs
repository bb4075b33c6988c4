//! Context command - Print the context gathered for a file
//!
//! Builds a throwaway index over an in-memory store with no session, so the
//! command never uploads or touches persisted metadata.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use ctxsync_core::ports::InMemoryKeyValueStore;
use ctxsync_remote::HttpUploader;
use ctxsync_sync::{ContextFile, ContextIndex, Selection, WatchMode};

use crate::commands::CommandContext;

#[derive(Debug, Args)]
pub struct ContextCommand {
    /// File to build context for, absolute or relative to the workspace root
    pub path: PathBuf,

    /// Only the file itself, without following imports
    #[arg(long)]
    pub no_imports: bool,

    /// Import hops to follow (defaults to context.max_depth)
    #[arg(long)]
    pub depth: Option<usize>,

    /// Restrict the primary file to a 1-based inclusive line range, e.g. 10-24
    #[arg(long, value_parser = parse_lines)]
    pub lines: Option<Selection>,
}

/// `a-b` or `a`, 1-based, into a 0-based selection
fn parse_lines(value: &str) -> Result<Selection, String> {
    let (start, end) = match value.split_once('-') {
        Some((start, end)) => (start.trim(), end.trim()),
        None => (value.trim(), value.trim()),
    };
    let parse = |s: &str| -> Result<usize, String> {
        match s.parse::<usize>() {
            Ok(0) => Err("line numbers start at 1".to_string()),
            Ok(n) => Ok(n - 1),
            Err(_) => Err(format!("'{s}' is not a line number")),
        }
    };
    Ok(Selection::new(parse(start)?, parse(end)?))
}

impl ContextCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = ctx.formatter();
        let mut config = ctx.load_config()?;
        config.remote.session_id = None;

        let include_imports = !self.no_imports && config.context.resolve_imports;
        let depth = self.depth.unwrap_or(config.context.max_depth);

        let uploader = Arc::new(HttpUploader::from_config(&config.remote)?);
        let index = ContextIndex::start(
            &config,
            Arc::new(InMemoryKeyValueStore::new()),
            uploader,
            WatchMode::EditorOnly,
        )
        .await?;

        let result = match self.lines {
            Some(selection) => {
                index
                    .get_context_for_selection(&self.path, selection, include_imports, depth)
                    .await
            }
            None => {
                index
                    .get_context_for_file(&self.path, include_imports, depth)
                    .await
            }
        };
        index.dispose().await;
        let files = result.with_context(|| format!("Cannot build context for {}", self.path.display()))?;

        if ctx.format.is_json() {
            let json = serde_json::to_value(&files).context("Failed to serialize context")?;
            formatter.print_json(&json);
            return Ok(());
        }

        for file in &files {
            print_file(file);
        }
        Ok(())
    }
}

fn print_file(file: &ContextFile) {
    let range = file
        .selection
        .map(|s| format!(" (lines {}-{})", s.start_line + 1, s.end_line + 1))
        .unwrap_or_default();
    println!(
        "==> {} [{}, depth {}]{}",
        file.path.display(),
        file.language.as_str(),
        file.depth,
        range
    );
    println!("{}", file.content);
    if !file.content.ends_with('\n') {
        println!();
    }
}
