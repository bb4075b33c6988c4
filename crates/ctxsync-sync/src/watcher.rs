//! Filesystem events and the per-path debounce queue
//!
//! [`FileWatcher`] turns `notify` callbacks into [`ChangeEvent`]s on an mpsc
//! channel. Editor integrations push into the same channel, so the scheduler
//! sees one stream regardless of where a change came from.
//!
//! ```text
//! inotify / FSEvents ──→ FileWatcher ──┐
//!                                      ├──→ mpsc ──→ DebouncedChangeQueue
//! editor buffer / save ────────────────┘
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ============================================================================
// ChangeEvent
// ============================================================================

/// A change to a workspace path, from the filesystem or an editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { old: PathBuf, new: PathBuf },
    /// An explicit save; bypasses the debounce window
    Saved(PathBuf),
}

impl ChangeEvent {
    /// The path the event refers to; the destination for renames
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) | Self::Saved(p) => p,
            Self::Renamed { new, .. } => new,
        }
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Recursive OS-native watcher feeding a [`ChangeEvent`] channel
///
/// Dropping the watcher stops all watches.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl FileWatcher {
    /// Creates a watcher that forwards mapped events to `tx`
    ///
    /// # Errors
    /// Returns an error if the platform watcher cannot be created
    pub fn new(tx: mpsc::Sender<ChangeEvent>) -> Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for change in map_notify_event(&event) {
                        // notify calls back on its own thread, outside the runtime
                        if let Err(e) = tx.blocking_send(change) {
                            warn!(error = %e, "Dropping change event, receiver closed");
                            return;
                        }
                    }
                }
                Err(err) => error!(error = %err, "File watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        Ok(Self {
            watcher,
            watched: Vec::new(),
        })
    }

    /// Watches `path` and everything below it
    ///
    /// # Errors
    /// Returns an error if the path does not exist or the OS watch limit is hit
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        self.watcher
            .watch(path, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", path.display()))?;
        info!(path = %path.display(), "Watching workspace");
        self.watched.push(path.to_path_buf());
        Ok(())
    }

    /// Stops watching `path`
    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        self.watcher
            .unwatch(path)
            .with_context(|| format!("Failed to unwatch path: {}", path.display()))?;
        self.watched.retain(|p| p != path);
        info!(path = %path.display(), "Stopped watching");
        Ok(())
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}

/// Maps a raw `notify` event to zero or more [`ChangeEvent`]s
///
/// Half renames (`From` / `To`, as reported when a file moves across watch
/// boundaries) become a delete or a create. Access events are dropped.
fn map_notify_event(event: &notify::Event) -> Vec<ChangeEvent> {
    let paths = &event.paths;
    let Some(first) = paths.first().cloned() else {
        return Vec::new();
    };

    let mapped = match &event.kind {
        EventKind::Create(_) => vec![ChangeEvent::Created(first)],
        EventKind::Remove(_) => vec![ChangeEvent::Deleted(first)],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths.get(1) {
            Some(new) => vec![ChangeEvent::Renamed {
                old: first,
                new: new.clone(),
            }],
            None => vec![ChangeEvent::Modified(first)],
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![ChangeEvent::Deleted(first)],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![ChangeEvent::Created(first)],
        EventKind::Modify(_) | EventKind::Any => vec![ChangeEvent::Modified(first)],
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    };

    if !mapped.is_empty() {
        debug!(kind = ?event.kind, path = %paths[0].display(), "Mapped notify event");
    }
    mapped
}

// ============================================================================
// DebouncedChangeQueue
// ============================================================================

/// Coalesces bursts of events per path
///
/// Each push replaces the path's pending event and restarts its quiet
/// period. [`poll`](Self::poll) hands back paths that stayed quiet for the
/// whole delay.
#[derive(Debug)]
pub struct DebouncedChangeQueue {
    pending: HashMap<PathBuf, (ChangeEvent, Instant)>,
    delay: Duration,
}

impl DebouncedChangeQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            delay,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Queues `event`, restarting the quiet period for its path
    pub fn push(&mut self, event: ChangeEvent) {
        let path = event.path().to_path_buf();
        self.pending.insert(path, (event, Instant::now()));
    }

    /// Removes and returns every event that has been quiet for the full delay
    pub fn poll(&mut self) -> Vec<ChangeEvent> {
        self.poll_at(Instant::now())
    }

    fn poll_at(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let delay = self.delay;
        let mut settled = Vec::new();
        self.pending.retain(|_, (event, queued_at)| {
            if now.saturating_duration_since(*queued_at) >= delay {
                settled.push(event.clone());
                false
            } else {
                true
            }
        });
        if !settled.is_empty() {
            debug!(count = settled.len(), remaining = self.pending.len(), "Debounce window elapsed");
        }
        settled
    }

    /// Drops any queued event for `path`, returning whether one existed
    pub fn discard(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
