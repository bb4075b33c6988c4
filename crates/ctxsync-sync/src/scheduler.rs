//! The single loop that drives a workspace
//!
//! [`SyncScheduler`] owns the event receiver and two timers. Everything that
//! happens over time goes through one `tokio::select!`, so events, debounce
//! flushes and sync ticks never interleave within the loop.
//!
//! ```text
//!              ┌─ event ──────────→ ChangeTracker::record_event
//! select! ─────┼─ debounce poll ──→ ChangeTracker::flush_settled
//!              ├─ sync interval ──→ SyncCoordinator::tick
//!              └─ cancelled ──────→ exit
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::{duration_ms, SyncCoordinator, SyncOutcome};
use crate::tracker::ChangeTracker;
use crate::watcher::ChangeEvent;

const MIN_DEBOUNCE_POLL: Duration = Duration::from_millis(10);

pub struct SyncScheduler {
    events: mpsc::Receiver<ChangeEvent>,
    tracker: Arc<ChangeTracker>,
    coordinator: Arc<SyncCoordinator>,
    debounce_poll: Duration,
    sync_interval: Duration,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    /// # Arguments
    /// * `events` - Watcher and editor events
    /// * `sync_interval` - Period of coordinator ticks
    /// * `shutdown` - Cancelling it ends [`run`](Self::run)
    pub fn new(
        events: mpsc::Receiver<ChangeEvent>,
        tracker: Arc<ChangeTracker>,
        coordinator: Arc<SyncCoordinator>,
        sync_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        // half the debounce delay bounds how late a settled path is noticed
        let debounce_poll = (tracker.options().debounce / 2).max(MIN_DEBOUNCE_POLL);
        Self {
            events,
            tracker,
            coordinator,
            debounce_poll,
            sync_interval: sync_interval.max(MIN_DEBOUNCE_POLL),
            shutdown,
        }
    }

    /// Run until the token is cancelled or every event sender is dropped
    pub async fn run(mut self) {
        info!(
            debounce_poll_ms = duration_ms(self.debounce_poll),
            sync_interval_ms = duration_ms(self.sync_interval),
            "Sync scheduler starting"
        );

        let mut debounce_timer = tokio::time::interval(self.debounce_poll);
        debounce_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sync_timer = tokio::time::interval(self.sync_interval);
        sync_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    debug!("Scheduler cancelled");
                    break;
                }

                event = self.events.recv() => match event {
                    Some(event) => self.tracker.record_event(event).await,
                    None => {
                        info!("Event channel closed");
                        break;
                    }
                },

                _ = debounce_timer.tick() => {
                    let flushed = self.tracker.flush_settled().await;
                    if flushed > 0 {
                        debug!(flushed, "Processed settled events");
                    }
                }

                _ = sync_timer.tick() => {
                    match self.coordinator.tick().await {
                        SyncOutcome::NoSession | SyncOutcome::Busy | SyncOutcome::Idle => {}
                        outcome => debug!(outcome = ?outcome, "Sync tick"),
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ctxsync_core::domain::WorkspaceId;
    use ctxsync_core::ports::{IUploader, InMemoryKeyValueStore, UploadError, UploadFile};
    use ctxsync_core::MetadataStore;

    use super::*;
    use crate::coordinator::CoordinatorOptions;
    use crate::filter::PatternFilter;
    use crate::tracker::TrackerOptions;

    #[derive(Default)]
    struct RecordingUploader {
        batches: Mutex<Vec<Vec<PathBuf>>>,
    }

    #[async_trait]
    impl IUploader for RecordingUploader {
        async fn upload(
            &self,
            _session_id: &str,
            _auth_token: Option<&str>,
            files: &[UploadFile],
        ) -> Result<(), UploadError> {
            self.batches
                .lock()
                .unwrap()
                .push(files.iter().map(|f| f.path.clone()).collect());
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
        tx: mpsc::Sender<ChangeEvent>,
        uploader: Arc<RecordingUploader>,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let filter = Arc::new(PatternFilter::new(&root, &["**/*.ts".to_string()], &[], false).unwrap());
        let store = Arc::new(MetadataStore::new(Arc::new(InMemoryKeyValueStore::new())));
        let tracker = Arc::new(ChangeTracker::new(
            WorkspaceId::new(root.clone()).unwrap(),
            filter,
            store,
            TrackerOptions {
                debounce: Duration::from_millis(20),
                ..TrackerOptions::default()
            },
        ));
        let shutdown = CancellationToken::new();
        let uploader = Arc::new(RecordingUploader::default());
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&tracker),
            Arc::clone(&uploader) as Arc<dyn IUploader>,
            CoordinatorOptions::default(),
            shutdown.child_token(),
        ));
        coordinator.set_session_id(Some("s".to_string()));

        let (tx, rx) = mpsc::channel(16);
        let scheduler = SyncScheduler::new(
            rx,
            tracker,
            coordinator,
            Duration::from_millis(40),
            shutdown.clone(),
        );
        let handle = tokio::spawn(scheduler.run());
        Harness {
            _dir: dir,
            root,
            tx,
            uploader,
            shutdown,
            handle,
        }
    }

    #[tokio::test]
    async fn test_event_flows_to_upload() {
        let h = start();
        let file = h.root.join("a.ts");
        std::fs::write(&file, "export {}\n").unwrap();
        h.tx.send(ChangeEvent::Modified(file.clone())).await.unwrap();

        let uploaded = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(batch) = h.uploader.batches.lock().unwrap().first().cloned() {
                    return batch;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(uploaded, vec![file]);

        h.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), h.handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stops_on_cancel() {
        let h = start();
        h.shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), h.handle).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stops_when_senders_dropped() {
        let h = start();
        drop(h.tx);
        let result = tokio::time::timeout(Duration::from_secs(1), h.handle).await;
        assert!(result.is_ok());
        assert!(h.uploader.batches.lock().unwrap().is_empty());
    }
}
