//! Change tracking
//!
//! [`ChangeTracker`] keeps an in-memory mirror of every tracked file's
//! [`FileMetadata`], seeded from the [`MetadataStore`] and kept current by
//! watcher and editor events. Files whose content changed since they were
//! last uploaded collect in a pending set that the coordinator drains.
//!
//! ## Event path
//!
//! ```text
//! ChangeEvent ──→ record_event ──→ debounce queue ──→ flush_settled ──→ classify
//!                      │                                                  │
//!                      └── Saved ─────────────────────────────────────────┘
//! ```
//!
//! Classification hashes the file, compares it against the mirror, persists
//! the new record and, when an upload is due, adds it to the pending set. All
//! of that happens under one mutex so a drain never observes half an update.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use ctxsync_core::config::TrackerConfig;
use ctxsync_core::domain::{ContentHash, FileMetadata, Language, WorkspaceId};
use ctxsync_core::ports::UploadFile;
use ctxsync_core::MetadataStore;

use crate::filter::PatternFilter;
use crate::watcher::{ChangeEvent, DebouncedChangeQueue};

const NOTICE_CAPACITY: usize = 256;

// ============================================================================
// Public types
// ============================================================================

/// Tracker tunables
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Quiet period a path needs before its events are classified
    pub debounce: Duration,
    /// Mtime drift tolerated for a file whose hash did not change
    pub mtime_tolerance: chrono::Duration,
    /// Files classified concurrently during the startup scan
    pub batch_size: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self::from(&TrackerConfig::default())
    }
}

impl From<&TrackerConfig> for TrackerOptions {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            mtime_tolerance: chrono::Duration::milliseconds(
                i64::try_from(config.mtime_tolerance_ms).unwrap_or(i64::MAX),
            ),
            batch_size: config.batch_size.max(1),
        }
    }
}

/// Broadcast to subscribers after the mirror changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChangeNotice {
    Changed { path: PathBuf, needs_sync: bool },
    Removed { path: PathBuf },
}

/// Result of classifying one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyOutcome {
    /// Same content and mtime within tolerance; nothing written
    Unchanged,
    /// Record updated and persisted
    Changed { needs_sync: bool },
    /// The file is gone; its record was dropped
    Removed,
    /// Not a trackable file, unreadable, or already being classified
    Skipped,
}

/// Counters from [`ChangeTracker::initialize`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSummary {
    /// Files found by the workspace walk
    pub discovered: usize,
    /// Files whose record was created or updated
    pub changed: usize,
    /// Files waiting for upload afterwards
    pub pending: usize,
    /// Stored records dropped because their file disappeared
    pub pruned: usize,
}

// ============================================================================
// Internal state
// ============================================================================

#[derive(Debug, Default)]
struct TrackerState {
    files: HashMap<PathBuf, FileMetadata>,
    pending: HashMap<PathBuf, FileMetadata>,
}

/// Marks a path as being classified until dropped
struct ProcessingGuard<'a> {
    set: &'a DashSet<PathBuf>,
    path: PathBuf,
}

impl<'a> ProcessingGuard<'a> {
    fn acquire(set: &'a DashSet<PathBuf>, path: &Path) -> Option<Self> {
        set.insert(path.to_path_buf()).then(|| Self {
            set,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.path);
    }
}

// ============================================================================
// ChangeTracker
// ============================================================================

/// Live, hash-verified view of a workspace
pub struct ChangeTracker {
    workspace: WorkspaceId,
    filter: Arc<PatternFilter>,
    store: Arc<MetadataStore>,
    options: TrackerOptions,
    state: tokio::sync::Mutex<TrackerState>,
    processing: DashSet<PathBuf>,
    queue: Mutex<DebouncedChangeQueue>,
    notices: broadcast::Sender<FileChangeNotice>,
}

impl ChangeTracker {
    /// Create a tracker with an empty mirror; call [`initialize`](Self::initialize) next
    pub fn new(
        workspace: WorkspaceId,
        filter: Arc<PatternFilter>,
        store: Arc<MetadataStore>,
        options: TrackerOptions,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            queue: Mutex::new(DebouncedChangeQueue::new(options.debounce)),
            workspace,
            filter,
            store,
            options,
            state: tokio::sync::Mutex::new(TrackerState::default()),
            processing: DashSet::new(),
            notices,
        }
    }

    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    fn queue(&self) -> MutexGuard<'_, DebouncedChangeQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Startup indexing
    // ========================================================================

    /// Seed the mirror from the store, then scan the workspace
    ///
    /// Files are classified `batch_size` at a time. Stored records whose
    /// file was not found by the scan are removed.
    ///
    /// # Errors
    /// Returns an error if the stored records cannot be read
    #[instrument(skip(self), fields(workspace = %self.workspace))]
    pub async fn initialize(&self) -> Result<IndexSummary> {
        let stored = self
            .store
            .get_all(&self.workspace)
            .await
            .context("Failed to load stored file metadata")?;
        {
            let mut state = self.state.lock().await;
            state.files = stored.into_iter().map(|m| (m.path.clone(), m)).collect();
            debug!(records = state.files.len(), "Seeded mirror from store");
        }

        let discovered = self.discover(self.workspace.as_path().to_path_buf()).await;
        let mut summary = IndexSummary {
            discovered: discovered.len(),
            ..IndexSummary::default()
        };

        for chunk in discovered.chunks(self.options.batch_size) {
            let outcomes = join_all(chunk.iter().map(|path| self.classify(path))).await;
            summary.changed += outcomes
                .iter()
                .filter(|o| matches!(o, ClassifyOutcome::Changed { .. }))
                .count();
        }

        let found: HashSet<&PathBuf> = discovered.iter().collect();
        let stale: Vec<PathBuf> = {
            let state = self.state.lock().await;
            state
                .files
                .keys()
                .filter(|p| !found.contains(p))
                .cloned()
                .collect()
        };
        for path in &stale {
            summary.pruned += self.remove(path).await;
        }

        summary.pending = self.pending_count().await;
        info!(
            discovered = summary.discovered,
            changed = summary.changed,
            pending = summary.pending,
            pruned = summary.pruned,
            "Workspace indexed"
        );
        Ok(summary)
    }

    /// Every tracked file below `dir`, pruning excluded directories
    async fn discover(&self, dir: PathBuf) -> Vec<PathBuf> {
        let filter = Arc::clone(&self.filter);
        let walk = tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    entry.depth() == 0
                        || !filter.is_excluded_entry(entry.path(), entry.file_type().is_dir())
                })
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable entry during scan");
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(walkdir::DirEntry::into_path)
                .collect::<Vec<_>>()
        });

        match walk.await {
            Ok(mut files) => {
                files.sort();
                files
            }
            Err(e) => {
                warn!(error = %e, "Workspace scan task failed");
                Vec::new()
            }
        }
    }

    // ========================================================================
    // Event path
    // ========================================================================

    fn accepts(&self, path: &Path) -> bool {
        !path.is_dir() && !self.filter.is_excluded_entry(path, false)
    }

    /// Feed one watcher or editor event into the tracker
    ///
    /// Creates and modifies are debounced. Saves are classified right away.
    /// Renamed directories have their files queued individually.
    pub async fn record_event(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::Created(path) | ChangeEvent::Modified(path) => {
                if self.accepts(&path) {
                    self.queue().push(ChangeEvent::Modified(path));
                }
            }
            ChangeEvent::Deleted(path) => {
                if self.workspace.contains(&path) {
                    self.queue().push(ChangeEvent::Deleted(path));
                }
            }
            ChangeEvent::Renamed { old, new } => {
                if self.workspace.contains(&old) {
                    self.queue().push(ChangeEvent::Deleted(old));
                }
                if new.is_dir() && !self.filter.is_excluded_entry(&new, true) {
                    let files = self.discover(new).await;
                    let mut queue = self.queue();
                    for file in files {
                        queue.push(ChangeEvent::Created(file));
                    }
                } else if self.accepts(&new) {
                    self.queue().push(ChangeEvent::Created(new));
                }
            }
            ChangeEvent::Saved(path) => {
                self.queue().discard(&path);
                if self.accepts(&path) {
                    self.classify(&path).await;
                }
            }
        }
    }

    /// Process every queued event whose debounce window has elapsed
    ///
    /// # Returns
    /// The number of paths processed
    pub async fn flush_settled(&self) -> usize {
        let settled = self.queue().poll();
        let count = settled.len();
        for event in settled {
            let path = event.path();
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => {
                    self.classify(path).await;
                }
                Ok(_) => {}
                Err(_) => {
                    self.remove(path).await;
                }
            }
        }
        count
    }

    /// Events still inside their debounce window
    pub fn queued_count(&self) -> usize {
        self.queue().pending_count()
    }

    // ========================================================================
    // Classification
    // ========================================================================

    /// Hash `path` and reconcile it with the mirror
    ///
    /// A path that is already being classified is re-queued instead, so the
    /// later observation is not lost.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn classify(&self, path: &Path) -> ClassifyOutcome {
        let Some(_guard) = ProcessingGuard::acquire(&self.processing, path) else {
            debug!("Already classifying, re-queued");
            self.queue().push(ChangeEvent::Modified(path.to_path_buf()));
            return ClassifyOutcome::Skipped;
        };

        let observed = match observe(path).await {
            Ok(Some(observed)) => observed,
            Ok(None) => return ClassifyOutcome::Skipped,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.remove(path).await;
                return ClassifyOutcome::Removed;
            }
            Err(e) => {
                warn!(error = %e, "Cannot read file, skipping");
                return ClassifyOutcome::Skipped;
            }
        };

        let mut state = self.state.lock().await;
        let prior = state.files.get(path);
        if !observed.has_changed_from(prior, self.options.mtime_tolerance) {
            return ClassifyOutcome::Unchanged;
        }

        let record = FileMetadata {
            last_synced_at: prior.and_then(|p| p.last_synced_at),
            ..observed
        };

        let workspace_last_sync = match self.store.get_workspace_last_sync(&self.workspace).await {
            Ok(at) => at,
            Err(e) => {
                warn!(error = %e, "Cannot read workspace sync time, assuming never synced");
                DateTime::<Utc>::default()
            }
        };
        let needs_sync = record.needs_sync(workspace_last_sync);

        if let Err(e) = self.store.save(&record, &self.workspace).await {
            warn!(error = %e, "Failed to persist file metadata");
        }

        if needs_sync || state.pending.contains_key(path) {
            state.pending.insert(path.to_path_buf(), record.clone());
        }
        state.files.insert(path.to_path_buf(), record);
        drop(state);

        debug!(needs_sync, "File changed");
        let _ = self.notices.send(FileChangeNotice::Changed {
            path: path.to_path_buf(),
            needs_sync,
        });
        ClassifyOutcome::Changed { needs_sync }
    }

    /// Forget `path` and, for a directory, everything below it
    ///
    /// # Returns
    /// The number of records removed
    pub async fn remove(&self, path: &Path) -> usize {
        let removed: Vec<PathBuf> = {
            let mut state = self.state.lock().await;
            let removed: Vec<PathBuf> = state
                .files
                .keys()
                .filter(|p| p.starts_with(path))
                .cloned()
                .collect();
            for p in &removed {
                state.files.remove(p);
                state.pending.remove(p);
                if let Err(e) = self.store.delete(p, &self.workspace).await {
                    warn!(path = %p.display(), error = %e, "Failed to delete file metadata");
                }
            }
            removed
        };

        for p in &removed {
            debug!(path = %p.display(), "File removed");
            let _ = self.notices.send(FileChangeNotice::Removed { path: p.clone() });
        }
        removed.len()
    }

    // ========================================================================
    // Pending set
    // ========================================================================

    /// Take every pending file, leaving the set empty
    ///
    /// Files classified after this call land in the next drain.
    pub async fn check_for_changes(&self) -> Vec<FileMetadata> {
        let drained = std::mem::take(&mut self.state.lock().await.pending);
        let mut files: Vec<FileMetadata> = drained.into_values().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Record that `path` was uploaded at `synced_at`
    ///
    /// A pending entry for the path is cleared unless the file was modified
    /// after `synced_at`.
    ///
    /// # Errors
    /// Returns an error if the updated record cannot be persisted
    pub async fn update_last_synced(&self, path: &Path, synced_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(record) = state.files.get_mut(path) else {
            debug!(path = %path.display(), "Synced file is no longer tracked");
            return Ok(());
        };
        record.last_synced_at = Some(synced_at);
        let record = record.clone();

        if state
            .pending
            .get(path)
            .is_some_and(|p| p.last_modified_at <= synced_at)
        {
            state.pending.remove(path);
        }

        self.store.save(&record, &self.workspace).await
    }

    /// Drop the mirror, the pending set, queued events and the stored records
    ///
    /// # Errors
    /// Returns an error if the stored records cannot be removed
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.files.clear();
        state.pending.clear();
        self.queue().clear();
        self.store.clear(&self.workspace).await?;
        info!(workspace = %self.workspace, "Cleared tracked files");
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeNotice> {
        self.notices.subscribe()
    }

    /// All tracked records, sorted by path
    pub async fn snapshot(&self) -> Vec<FileMetadata> {
        let mut files: Vec<FileMetadata> = self.state.lock().await.files.values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn tracked_count(&self) -> usize {
        self.state.lock().await.files.len()
    }

    /// Current content of `path` ready for upload, or `None` if unreadable
    pub async fn read_upload_file(&self, path: &Path) -> Option<UploadFile> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Some(UploadFile {
                path: path.to_path_buf(),
                content: String::from_utf8_lossy(&bytes).into_owned(),
                language: Language::from_path(path),
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read file for upload");
                None
            }
        }
    }
}

/// Hash and mtime of `path`; `None` for anything that is not a regular file
async fn observe(path: &Path) -> std::io::Result<Option<FileMetadata>> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Ok(None);
    }
    let bytes = tokio::fs::read(path).await?;
    let modified: DateTime<Utc> = meta.modified()?.into();
    Ok(Some(FileMetadata::new(
        path.to_path_buf(),
        ContentHash::compute(&bytes),
        modified,
    )))
}
