//! ctxsync Daemon - Background change tracking and sync
//!
//! Keeps one workspace indexed and pushes changed files to the context
//! service:
//! - Startup scan against the persisted metadata
//! - Filesystem watching with per-path debounce
//! - Periodic upload of pending files with bounded retry
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! `main` loads the configuration, initializes tracing and hands a
//! `CancellationToken` to [`DaemonService`]. The service opens the SQLite
//! store, starts a [`ContextIndex`] and waits for the token, logging a status
//! line now and then. Cancelling the token disposes the index.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ctxsync_cache::{pool::DatabasePool, SqliteKeyValueStore};
use ctxsync_core::config::{Config, LoggingConfig};
use ctxsync_remote::HttpUploader;
use ctxsync_sync::{ContextIndex, WatchMode};

/// Interval between status lines
const STATUS_INTERVAL: Duration = Duration::from_secs(300);

const SESSION_ENV: &str = "CTXSYNC_SESSION_ID";
const TOKEN_ENV: &str = "CTXSYNC_AUTH_TOKEN";

#[derive(Debug, Parser)]
#[command(name = "ctxsyncd", version, about = "ctxsync background sync daemon")]
struct Args {
    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Workspace to track, overriding the config
    #[arg(long, short)]
    workspace: Option<PathBuf>,

    /// Start a fresh session with a random id
    #[arg(long)]
    new_session: bool,

    /// Do not install a filesystem watcher
    #[arg(long)]
    no_watch: bool,
}

// ============================================================================
// DaemonService
// ============================================================================

struct DaemonService {
    config: Config,
    mode: WatchMode,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, mode: WatchMode, shutdown: CancellationToken) -> Self {
        Self {
            config,
            mode,
            shutdown,
        }
    }

    /// Runs until the shutdown token is cancelled
    async fn run(&self) -> Result<()> {
        let db_path = self.config.database_path();
        let db = DatabasePool::new(&db_path)
            .await
            .context("Failed to open metadata database")?;
        let store = Arc::new(SqliteKeyValueStore::new(db.pool().clone()));

        let uploader = Arc::new(
            HttpUploader::from_config(&self.config.remote).context("Failed to create uploader")?,
        );
        info!(endpoint = %uploader.base_url(), "Uploader ready");

        if self.config.remote.session_id.is_none() {
            warn!("No session id configured, uploads are paused until one is set");
        }

        let index = ContextIndex::start(&self.config, store, uploader, self.mode)
            .await
            .context("Failed to start context index")?;

        let status = index.status().await;
        info!(
            workspace = %status.workspace.display(),
            tracked = status.tracked,
            pending = status.pending,
            "Daemon ready"
        );

        let mut status_timer = tokio::time::interval(STATUS_INTERVAL);
        status_timer.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping context index");
                    break;
                }
                _ = status_timer.tick() => {
                    let status = index.status().await;
                    info!(
                        tracked = status.tracked,
                        pending = status.pending,
                        queued = status.queued,
                        phase = %status.phase,
                        "Status"
                    );
                }
            }
        }

        index.dispose().await;
        db.close().await;
        Ok(())
    }
}

// ============================================================================
// Startup helpers
// ============================================================================

/// Overlay command-line and environment values onto the loaded config
fn apply_overrides(
    mut config: Config,
    args: &Args,
    env_session: Option<String>,
    env_token: Option<String>,
) -> Config {
    if let Some(workspace) = &args.workspace {
        config.workspace.root = workspace.clone();
    }
    if let Some(session) = env_session.filter(|s| !s.is_empty()) {
        config.remote.session_id = Some(session);
    }
    if args.new_session {
        config.remote.session_id = Some(uuid::Uuid::new_v4().to_string());
    }
    if let Some(token) = env_token.filter(|t| !t.is_empty()) {
        config.remote.auth_token = Some(token);
    }
    config
}

/// `RUST_LOG` wins; otherwise the configured level
fn env_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
}

fn init_tracing(logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(logging))
        .with_target(true);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Waits for SIGTERM or SIGINT and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    let config = apply_overrides(
        config,
        &args,
        std::env::var(SESSION_ENV).ok(),
        std::env::var(TOKEN_ENV).ok(),
    );

    init_tracing(&config.logging);
    info!(config_path = %config_path.display(), "ctxsync daemon starting (ctxsyncd)");

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!(field = %e.field, message = %e.message, "Invalid configuration");
        }
        anyhow::bail!("Configuration has {} error(s)", errors.len());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let mode = if args.no_watch {
        WatchMode::EditorOnly
    } else {
        WatchMode::Filesystem
    };
    let result = DaemonService::new(config, mode, shutdown).run().await;

    match &result {
        Ok(()) => info!("ctxsync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "ctxsync daemon exiting with error"),
    }
    result
}
