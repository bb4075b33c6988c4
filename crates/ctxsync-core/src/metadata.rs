//! Metadata store
//!
//! Persists [`FileMetadata`] records per workspace on top of an
//! [`IKeyValueStore`]. Layout:
//!
//! - `fileMetadata_<encoded root>` holds a JSON array of records
//! - `workspaceMetadata_<encoded root>` holds `{ "lastSync": <ms> }`
//!
//! Missing keys read as empty. Every save refreshes the workspace's
//! `lastSync` to the current time.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::domain::{FileMetadata, WorkspaceId, WorkspaceSyncState};
use crate::ports::IKeyValueStore;

/// Key prefix of every workspace's record array
pub const FILE_METADATA_PREFIX: &str = "fileMetadata_";
const WORKSPACE_METADATA_PREFIX: &str = "workspaceMetadata_";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    last_sync: DateTime<Utc>,
}

/// Per-workspace store of file metadata records
pub struct MetadataStore {
    store: Arc<dyn IKeyValueStore>,
    /// Serializes read-modify-write sequences on the record arrays
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(store: Arc<dyn IKeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn files_key(workspace: &WorkspaceId) -> String {
        format!("{FILE_METADATA_PREFIX}{}", workspace.encoded())
    }

    fn workspace_key(workspace: &WorkspaceId) -> String {
        format!("{WORKSPACE_METADATA_PREFIX}{}", workspace.encoded())
    }

    async fn load_records(&self, workspace: &WorkspaceId) -> Result<Vec<FileMetadata>> {
        let key = Self::files_key(workspace);
        match self.store.get(&key).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value)
                .with_context(|| format!("Malformed metadata records under {key}")),
        }
    }

    async fn write_records(&self, workspace: &WorkspaceId, records: &[FileMetadata]) -> Result<()> {
        let value = serde_json::to_value(records).context("Failed to serialize metadata")?;
        self.store.set(&Self::files_key(workspace), value).await
    }

    async fn touch_workspace(&self, workspace: &WorkspaceId) -> Result<()> {
        let record = WorkspaceRecord {
            last_sync: Utc::now(),
        };
        let value = serde_json::to_value(&record)?;
        self.store.set(&Self::workspace_key(workspace), value).await
    }

    /// Insert or replace the record for `metadata.path`
    ///
    /// Also refreshes the workspace's last sync timestamp.
    #[instrument(skip(self, metadata), fields(path = %metadata.path.display()))]
    pub async fn save(&self, metadata: &FileMetadata, workspace: &WorkspaceId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load_records(workspace).await?;
        match records.iter_mut().find(|r| r.path == metadata.path) {
            Some(existing) => *existing = metadata.clone(),
            None => records.push(metadata.clone()),
        }
        self.write_records(workspace, &records).await?;
        self.touch_workspace(workspace).await?;

        debug!(records = records.len(), "Saved file metadata");
        Ok(())
    }

    /// Look up the record for `path`
    pub async fn get(&self, path: &Path, workspace: &WorkspaceId) -> Result<Option<FileMetadata>> {
        let records = self.load_records(workspace).await?;
        Ok(records.into_iter().find(|r| r.path == path))
    }

    /// All records of the workspace, in insertion order
    pub async fn get_all(&self, workspace: &WorkspaceId) -> Result<Vec<FileMetadata>> {
        self.load_records(workspace).await
    }

    /// Remove the record for `path`, if any
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn delete(&self, path: &Path, workspace: &WorkspaceId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load_records(workspace).await?;
        let before = records.len();
        records.retain(|r| r.path != path);
        if records.len() != before {
            self.write_records(workspace, &records).await?;
            debug!("Deleted file metadata");
        }
        Ok(())
    }

    /// Drop every record and the workspace bookkeeping
    #[instrument(skip(self), fields(workspace = %workspace))]
    pub async fn clear(&self, workspace: &WorkspaceId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.store.remove(&Self::files_key(workspace)).await?;
        self.store.remove(&Self::workspace_key(workspace)).await?;
        Ok(())
    }

    /// When any record of the workspace was last written
    ///
    /// # Returns
    /// The Unix epoch when the workspace has no bookkeeping yet
    pub async fn get_workspace_last_sync(&self, workspace: &WorkspaceId) -> Result<DateTime<Utc>> {
        Ok(self.workspace_state(workspace).await?.last_sync_timestamp)
    }

    /// Workspace bookkeeping as a domain value
    pub async fn workspace_state(&self, workspace: &WorkspaceId) -> Result<WorkspaceSyncState> {
        let key = Self::workspace_key(workspace);
        let record = match self.store.get(&key).await? {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<WorkspaceRecord>(value)
                    .with_context(|| format!("Malformed workspace record under {key}"))?,
            ),
        };

        Ok(match record {
            Some(record) => WorkspaceSyncState {
                workspace_id: workspace.clone(),
                last_sync_timestamp: record.last_sync,
            },
            None => WorkspaceSyncState::never_synced(workspace.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::domain::ContentHash;
    use crate::ports::InMemoryKeyValueStore;

    fn workspace() -> WorkspaceId {
        WorkspaceId::new(PathBuf::from("/ws")).unwrap()
    }

    fn record(path: &str, content: &[u8]) -> FileMetadata {
        FileMetadata::new(
            PathBuf::from(path),
            ContentHash::compute(content),
            Utc.timestamp_millis_opt(1_000).unwrap(),
        )
    }

    fn setup() -> (Arc<InMemoryKeyValueStore>, MetadataStore) {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let store = MetadataStore::new(kv.clone());
        (kv, store)
    }

    #[tokio::test]
    async fn test_empty_workspace_reads_empty() {
        let (_, store) = setup();
        let ws = workspace();
        assert!(store.get_all(&ws).await.unwrap().is_empty());
        assert!(store.get(Path::new("/ws/a"), &ws).await.unwrap().is_none());
        assert_eq!(
            store.get_workspace_last_sync(&ws).await.unwrap().timestamp_millis(),
            0
        );
    }

    #[tokio::test]
    async fn test_save_inserts_then_replaces() {
        let (_, store) = setup();
        let ws = workspace();

        store.save(&record("/ws/a.ts", b"one"), &ws).await.unwrap();
        store.save(&record("/ws/b.ts", b"two"), &ws).await.unwrap();
        store.save(&record("/ws/a.ts", b"three"), &ws).await.unwrap();

        let all = store.get_all(&ws).await.unwrap();
        assert_eq!(all.len(), 2);
        let a = store.get(Path::new("/ws/a.ts"), &ws).await.unwrap().unwrap();
        assert_eq!(a.content_hash, ContentHash::compute(b"three"));
    }

    #[tokio::test]
    async fn test_save_refreshes_workspace_last_sync() {
        let (_, store) = setup();
        let ws = workspace();
        let before = Utc::now();

        store.save(&record("/ws/a.ts", b"one"), &ws).await.unwrap();

        let last = store.get_workspace_last_sync(&ws).await.unwrap();
        assert!(last.timestamp_millis() >= before.timestamp_millis());
        assert!(store.workspace_state(&ws).await.unwrap().has_synced());
    }

    #[tokio::test]
    async fn test_uses_documented_keys() {
        let (kv, store) = setup();
        let ws = workspace();
        store.save(&record("/ws/a.ts", b"one"), &ws).await.unwrap();

        let files = kv.get("fileMetadata_%2Fws").await.unwrap().unwrap();
        assert!(files.is_array());
        assert_eq!(files[0]["path"], "/ws/a.ts");

        let ws_record = kv.get("workspaceMetadata_%2Fws").await.unwrap().unwrap();
        assert!(ws_record["lastSync"].is_i64());
    }

    #[tokio::test]
    async fn test_delete_removes_only_target() {
        let (_, store) = setup();
        let ws = workspace();
        store.save(&record("/ws/a.ts", b"one"), &ws).await.unwrap();
        store.save(&record("/ws/b.ts", b"two"), &ws).await.unwrap();

        store.delete(Path::new("/ws/a.ts"), &ws).await.unwrap();
        store.delete(Path::new("/ws/missing.ts"), &ws).await.unwrap();

        let all = store.get_all(&ws).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].path, PathBuf::from("/ws/b.ts"));
    }

    #[tokio::test]
    async fn test_clear_wipes_workspace_only() {
        let (_, store) = setup();
        let ws = workspace();
        let other = WorkspaceId::new(PathBuf::from("/other")).unwrap();
        store.save(&record("/ws/a.ts", b"one"), &ws).await.unwrap();
        store.save(&record("/other/b.ts", b"two"), &other).await.unwrap();

        store.clear(&ws).await.unwrap();

        assert!(store.get_all(&ws).await.unwrap().is_empty());
        assert_eq!(
            store.get_workspace_last_sync(&ws).await.unwrap().timestamp_millis(),
            0
        );
        assert_eq!(store.get_all(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_records_are_an_error() {
        let (kv, store) = setup();
        let ws = workspace();
        kv.set("fileMetadata_%2Fws", json!({"not": "an array"}))
            .await
            .unwrap();
        assert!(store.get_all(&ws).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_saves_are_not_lost() {
        let (_, store) = setup();
        let store = Arc::new(store);
        let ws = workspace();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            let ws = ws.clone();
            handles.push(tokio::spawn(async move {
                let path = format!("/ws/file{i}.ts");
                store.save(&record(&path, path.as_bytes()), &ws).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_all(&ws).await.unwrap().len(), 20);
    }
}
