//! File metadata records
//!
//! A [`FileMetadata`] is the persisted fingerprint of one tracked file. It is
//! what lets the tracker tell an unchanged file from a modified one across
//! restarts, and what decides whether a file still has to be uploaded.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, WorkspaceId};

/// Persisted fingerprint of a tracked file
///
/// Serialized with camelCase keys and millisecond Unix timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Absolute path of the file
    pub path: PathBuf,
    /// SHA-256 of the content at the last observation
    pub content_hash: ContentHash,
    /// Filesystem modification time at the last observation
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_modified_at: DateTime<Utc>,
    /// When the content was last acknowledged by the remote service
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl FileMetadata {
    /// Create a record for a file that has never been synced
    pub fn new(path: PathBuf, content_hash: ContentHash, last_modified_at: DateTime<Utc>) -> Self {
        Self {
            path,
            content_hash,
            last_modified_at,
            last_synced_at: None,
        }
    }

    /// Whether this observation differs from `prior`
    ///
    /// A file has changed when its hash differs or its mtime moved by more
    /// than `tolerance` in either direction. No prior record always counts
    /// as a change.
    pub fn has_changed_from(&self, prior: Option<&FileMetadata>, tolerance: Duration) -> bool {
        match prior {
            None => true,
            Some(prior) => {
                prior.content_hash != self.content_hash
                    || (self.last_modified_at - prior.last_modified_at).abs() > tolerance
            }
        }
    }

    /// Whether the file has to be uploaded
    ///
    /// True when it was never synced, when it was modified after its own
    /// last sync, or when it was modified after the workspace's last sync.
    pub fn needs_sync(&self, workspace_last_sync: DateTime<Utc>) -> bool {
        match self.last_synced_at {
            None => true,
            Some(synced) => {
                synced < self.last_modified_at || workspace_last_sync < self.last_modified_at
            }
        }
    }
}

/// Workspace-level sync bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSyncState {
    pub workspace_id: WorkspaceId,
    /// Refreshed whenever any record in the workspace is written.
    /// The Unix epoch means "never".
    pub last_sync_timestamp: DateTime<Utc>,
}

impl WorkspaceSyncState {
    /// State for a workspace that has no persisted bookkeeping yet
    pub fn never_synced(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            last_sync_timestamp: DateTime::<Utc>::default(),
        }
    }

    pub fn has_synced(&self) -> bool {
        self.last_sync_timestamp > DateTime::<Utc>::default()
    }
}
