//! Config command - View and check ctxsync configuration
//!
//! Provides the `ctxsync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Validates the configuration and reports every problem
//! 3. Prints where the configuration file is looked up

use anyhow::{Context, Result};
use clap::Subcommand;
use ctxsync_core::config::ValidationError;
use tracing::info;

use crate::commands::CommandContext;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(ctx),
            ConfigCommand::Validate => execute_validate(ctx),
            ConfigCommand::Path => execute_path(ctx),
        }
    }
}

fn execute_show(ctx: &CommandContext) -> Result<()> {
    let formatter = ctx.formatter();
    let config = ctx.load_config()?;
    info!(config_path = %ctx.config_path.display(), "Showing configuration");

    if ctx.format.is_json() {
        let json = serde_json::to_value(&config).context("Failed to serialize configuration")?;
        formatter.print_json(&json);
        return Ok(());
    }

    let source = if ctx.config_path.exists() {
        ctx.config_path.display().to_string()
    } else {
        "defaults".to_string()
    };
    formatter.success(&format!("Configuration ({source})"));
    formatter.info("");
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn execute_validate(ctx: &CommandContext) -> Result<()> {
    let formatter = ctx.formatter();
    let errors = match ctx.load_config() {
        Ok(config) => config.validate(),
        Err(e) => vec![ValidationError {
            field: "file".to_string(),
            message: format!("{e:#}"),
        }],
    };

    if ctx.format.is_json() {
        let details: Vec<_> = errors
            .iter()
            .map(|e| serde_json::json!({"field": e.field, "message": e.message}))
            .collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": ctx.config_path.display().to_string(),
            "errors": details,
        }));
        return Ok(());
    }

    if errors.is_empty() {
        formatter.success(&format!("Configuration is valid ({})", ctx.config_path.display()));
    } else {
        formatter.error(&format!("{} problem(s) found", errors.len()));
        for e in &errors {
            formatter.info(&format!("{}: {}", e.field, e.message));
        }
    }
    Ok(())
}

fn execute_path(ctx: &CommandContext) -> Result<()> {
    let formatter = ctx.formatter();
    if ctx.format.is_json() {
        formatter.print_json(&serde_json::json!({
            "config_path": ctx.config_path.display().to_string(),
            "exists": ctx.config_path.exists(),
        }));
    } else {
        println!("{}", ctx.config_path.display());
    }
    Ok(())
}
