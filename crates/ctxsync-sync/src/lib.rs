//! ctxsync Sync - Change tracking and synchronization engine
//!
//! Keeps a live, hash-verified view of a workspace and uploads only what
//! changed.
//!
//! ## Modules
//!
//! - [`filter`] - Include/exclude globs plus the workspace `.gitignore`
//! - [`watcher`] - Filesystem watching and the per-path debounce queue
//! - [`tracker`] - Content hashing, change classification, pending set
//! - [`coordinator`] - Upload cycles with bounded retry
//! - [`scheduler`] - Single loop driving events, debounce and sync ticks
//! - [`index`] - [`ContextIndex`], the facade the rest of an application uses
//!
//! ## Flow
//!
//! ```text
//! notify / editor ──→ mpsc ──→ SyncScheduler ──→ ChangeTracker ──→ pending set
//!                                   │                                   │
//!                                   └── sync tick ──→ SyncCoordinator ◀─┘
//!                                                          │
//!                                                      IUploader
//! ```

pub mod coordinator;
pub mod filter;
pub mod index;
pub mod scheduler;
pub mod tracker;
pub mod watcher;

use std::path::PathBuf;

use thiserror::Error;

pub use coordinator::{CoordinatorOptions, SyncCoordinator, SyncOutcome, SyncPhase};
pub use filter::{FilterError, PatternFilter};
pub use index::{ContextFile, ContextIndex, IndexStatus, Selection, WatchMode};
pub use scheduler::SyncScheduler;
pub use tracker::{ChangeTracker, ClassifyOutcome, FileChangeNotice, IndexSummary, TrackerOptions};
pub use watcher::{ChangeEvent, FileWatcher};

/// Errors that can occur while reading workspace files
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Insufficient filesystem permissions
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// A domain-level error propagated from ctxsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] ctxsync_core::domain::DomainError),

    /// Invalid include/exclude configuration
    #[error("Filter error: {0}")]
    FilterError(#[from] FilterError),
}

impl SyncError {
    /// Attach `path` to the common I/O failure kinds
    pub fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::PathNotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::IoError(err),
        }
    }
}
