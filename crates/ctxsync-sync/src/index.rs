//! [`ContextIndex`]: one tracked workspace, wired together
//!
//! Owns the tracker, coordinator, import resolver, watcher and scheduler
//! task for a workspace. Construct it with [`ContextIndex::start`] and pass
//! it around by `Arc`; there is no global instance.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use ctxsync_core::config::Config;
use ctxsync_core::domain::{Language, WorkspaceId};
use ctxsync_core::ports::{IKeyValueStore, IUploader};
use ctxsync_core::MetadataStore;
use ctxsync_imports::ImportGraphResolver;

use crate::coordinator::{CoordinatorOptions, SyncCoordinator, SyncOutcome, SyncPhase};
use crate::filter::PatternFilter;
use crate::scheduler::SyncScheduler;
use crate::tracker::{ChangeTracker, TrackerOptions};
use crate::watcher::{ChangeEvent, FileWatcher};
use crate::SyncError;

const EVENT_CAPACITY: usize = 1024;

/// Where change events come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// OS filesystem notifications plus editor events
    Filesystem,
    /// Only what the host editor reports through `notify_*`
    EditorOnly,
}

/// Line range of a selection, 0-based and inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub start_line: usize,
    pub end_line: usize,
}

impl Selection {
    pub fn new(start_line: usize, end_line: usize) -> Self {
        Self {
            start_line: start_line.min(end_line),
            end_line: start_line.max(end_line),
        }
    }

    /// The selected lines of `content`, joined with `\n`
    fn narrow(&self, content: &str) -> String {
        content
            .lines()
            .skip(self.start_line)
            .take(
                self.end_line
                    .saturating_sub(self.start_line)
                    .saturating_add(1),
            )
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A file handed to the assistant as context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFile {
    pub path: PathBuf,
    pub content: String,
    pub language: Language,
    /// Import hops from the primary file; 0 for the primary file itself
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

/// Point-in-time counters for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub workspace: PathBuf,
    pub tracked: usize,
    pub pending: usize,
    pub queued: usize,
    pub phase: String,
    pub has_session: bool,
}

/// Facade over a tracked workspace
pub struct ContextIndex {
    workspace: WorkspaceId,
    tracker: Arc<ChangeTracker>,
    coordinator: Arc<SyncCoordinator>,
    resolver: ImportGraphResolver,
    events: mpsc::Sender<ChangeEvent>,
    watcher: Mutex<Option<FileWatcher>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl ContextIndex {
    /// Index the configured workspace and start watching and syncing it
    ///
    /// # Arguments
    /// * `store` - Backing store for file metadata
    /// * `uploader` - Destination for changed files
    /// * `mode` - Whether to install an OS watcher
    ///
    /// # Errors
    /// Returns an error if the workspace root is not accessible, a configured
    /// glob is invalid, stored metadata cannot be read, or the watcher fails
    #[instrument(skip_all, fields(root = %config.workspace.root.display()))]
    pub async fn start(
        config: &Config,
        store: Arc<dyn IKeyValueStore>,
        uploader: Arc<dyn IUploader>,
        mode: WatchMode,
    ) -> Result<Self> {
        let root = config.workspace_root()?;
        let workspace = WorkspaceId::new(root.clone())?;
        let filter = Arc::new(
            PatternFilter::from_config(&root, &config.workspace)
                .context("Invalid workspace patterns")?,
        );

        let tracker = Arc::new(ChangeTracker::new(
            workspace.clone(),
            filter,
            Arc::new(MetadataStore::new(store)),
            TrackerOptions::from(&config.tracker),
        ));

        // Watching starts before the initial scan; edits made while it runs
        // wait in the channel and are reclassified once the scheduler starts
        let (events, rx) = mpsc::channel(EVENT_CAPACITY);
        let watcher = match mode {
            WatchMode::Filesystem => {
                let mut watcher = FileWatcher::new(events.clone())?;
                watcher.watch(&root)?;
                Some(watcher)
            }
            WatchMode::EditorOnly => None,
        };
        tracker.initialize().await?;

        let shutdown = CancellationToken::new();
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&tracker),
            uploader,
            CoordinatorOptions::from(&config.sync),
            shutdown.child_token(),
        ));
        coordinator.set_session_id(config.remote.session_id.clone());
        coordinator.set_auth_token(config.remote.auth_token.clone());

        let scheduler = SyncScheduler::new(
            rx,
            Arc::clone(&tracker),
            Arc::clone(&coordinator),
            Duration::from_millis(config.sync.interval_ms),
            shutdown.clone(),
        );
        let handle = tokio::spawn(scheduler.run());

        info!(workspace = %workspace, mode = ?mode, "Context index started");
        Ok(Self {
            resolver: ImportGraphResolver::new(&root),
            workspace,
            tracker,
            coordinator,
            events,
            watcher: Mutex::new(watcher),
            scheduler: Mutex::new(Some(handle)),
            shutdown,
        })
    }

    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    // ========================================================================
    // Context assembly
    // ========================================================================

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.as_path().join(path)
        }
    }

    /// The file at `path` plus, optionally, what it imports
    ///
    /// Imports are followed breadth-first up to `max_depth` hops; each file
    /// appears once. Imported files that cannot be read are left out.
    ///
    /// # Errors
    /// Returns an error only if the primary file cannot be read
    pub async fn get_context_for_file(
        &self,
        path: &Path,
        resolve_imports: bool,
        max_depth: usize,
    ) -> Result<Vec<ContextFile>, SyncError> {
        let path = self.absolute(path);
        let content = read_lossy(&path)
            .await
            .map_err(|e| SyncError::from_io(&path, e))?;

        let mut files = vec![ContextFile {
            language: Language::from_path(&path),
            path: path.clone(),
            content,
            depth: 0,
            selection: None,
        }];
        if !resolve_imports || max_depth == 0 {
            return Ok(files);
        }

        let mut visited: HashSet<PathBuf> = HashSet::from([path]);
        let mut next = 0;
        while next < files.len() {
            let (imports, depth) = {
                let file = &files[next];
                if file.depth >= max_depth {
                    next += 1;
                    continue;
                }
                let imports = self
                    .resolver
                    .resolve_imports(&file.path, &file.content, file.language);
                (imports, file.depth + 1)
            };
            next += 1;

            for import in imports {
                if !visited.insert(import.clone()) {
                    continue;
                }
                match read_lossy(&import).await {
                    Ok(content) => files.push(ContextFile {
                        language: Language::from_path(&import),
                        path: import,
                        content,
                        depth,
                        selection: None,
                    }),
                    Err(e) => debug!(path = %import.display(), error = %e, "Skipping unreadable import"),
                }
            }
        }

        debug!(files = files.len(), "Assembled context");
        Ok(files)
    }

    /// Like [`get_context_for_file`](Self::get_context_for_file), with the
    /// primary file narrowed to `selection`
    ///
    /// Imports are still resolved from the whole primary file.
    pub async fn get_context_for_selection(
        &self,
        path: &Path,
        selection: Selection,
        resolve_imports: bool,
        max_depth: usize,
    ) -> Result<Vec<ContextFile>, SyncError> {
        let mut files = self
            .get_context_for_file(path, resolve_imports, max_depth)
            .await?;
        if let Some(primary) = files.first_mut() {
            primary.content = selection.narrow(&primary.content);
            primary.selection = Some(selection);
        }
        Ok(files)
    }

    // ========================================================================
    // Sync control
    // ========================================================================

    pub fn set_session_id(&self, session_id: Option<String>) {
        self.coordinator.set_session_id(session_id);
    }

    pub fn set_auth_token(&self, token: Option<String>) {
        self.coordinator.set_auth_token(token);
    }

    pub async fn sync_now(&self) -> SyncOutcome {
        self.coordinator.sync_now().await
    }

    // ========================================================================
    // Editor events
    // ========================================================================

    /// An open buffer changed; debounced like a filesystem modify
    pub async fn notify_editor_change(&self, path: &Path) {
        self.send(ChangeEvent::Modified(self.absolute(path))).await;
    }

    /// A buffer was saved; classified without waiting for the debounce
    pub async fn notify_saved(&self, path: &Path) {
        self.send(ChangeEvent::Saved(self.absolute(path))).await;
    }

    async fn send(&self, event: ChangeEvent) {
        if let Err(e) = self.events.send(event).await {
            warn!(path = %e.0.path().display(), "Index is shut down, event dropped");
        }
    }

    pub async fn status(&self) -> IndexStatus {
        let phase: SyncPhase = self.coordinator.phase();
        IndexStatus {
            workspace: self.workspace.as_path().to_path_buf(),
            tracked: self.tracker.tracked_count().await,
            pending: self.tracker.pending_count().await,
            queued: self.tracker.queued_count(),
            phase: phase.to_string(),
            has_session: self.coordinator.session_id().is_some(),
        }
    }

    /// Stop the scheduler, cancel retries and drop the watcher
    pub async fn dispose(&self) {
        self.shutdown.cancel();
        self.coordinator.dispose();
        drop(
            self.watcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handle = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!(workspace = %self.workspace, "Context index stopped");
    }
}

impl Drop for ContextIndex {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn read_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
