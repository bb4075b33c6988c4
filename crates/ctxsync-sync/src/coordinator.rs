//! Upload cycles with bounded retry
//!
//! ## Phases
//!
//! ```text
//!            tick / sync_now (CAS)
//!   Idle ─────────────────────────→ Syncing ──→ Idle      (success, empty, dropped)
//!    ▲                                 │
//!    │                                 └──→ Retrying     (transient, attempts < max)
//!    │                                          │
//!    └──── Syncing ←── retry timer (CAS) ───────┘
//! ```
//!
//! Only the Idle→Syncing and Retrying→Syncing transitions start work, and
//! both are compare-and-swap, so at most one upload is ever in flight.
//! A transient failure holds the batch; the retry uploads it again together
//! with whatever became pending meanwhile.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ctxsync_core::config::SyncConfig;
use ctxsync_core::domain::FileMetadata;
use ctxsync_core::ports::IUploader;

use crate::tracker::ChangeTracker;

/// Retry policy
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Retries after the initial attempt before a batch is dropped
    pub max_retries: u32,
    /// Fixed delay before each retry
    pub retry_delay: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for CoordinatorOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Syncing,
    Retrying,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Retrying => "retrying",
        };
        write!(f, "{s}")
    }
}

/// What a sync attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No session id configured; nothing attempted
    NoSession,
    /// Another cycle is running or a retry is scheduled
    Busy,
    /// Nothing was pending
    Idle,
    Synced { files: usize },
    /// Transient failure; the batch is held and retried after `delay`
    Retrying { attempt: u32, delay: Duration },
    /// Permanent failure or retries exhausted; the batch was discarded
    Dropped { files: usize, reason: String },
}

#[derive(Debug, Default)]
struct RetryState {
    attempts: u32,
    held: Vec<FileMetadata>,
}

/// Whole milliseconds of `d` for log fields, saturating at `u64::MAX`
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Returns a cycle left in Syncing to Idle when its future is dropped
/// before completing
struct CycleGuard<'a> {
    coordinator: &'a SyncCoordinator,
    completed: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut phase = self
            .coordinator
            .phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *phase == SyncPhase::Syncing {
            *phase = SyncPhase::Idle;
            warn!("Sync cycle abandoned mid-upload, batch kept for the next cycle");
        }
    }
}

/// Drains the tracker's pending set into the upload port
pub struct SyncCoordinator {
    tracker: Arc<ChangeTracker>,
    uploader: Arc<dyn IUploader>,
    options: CoordinatorOptions,
    phase: Mutex<SyncPhase>,
    retry: tokio::sync::Mutex<RetryState>,
    session_id: RwLock<Option<String>>,
    auth_token: RwLock<Option<String>>,
    shutdown: CancellationToken,
}

impl SyncCoordinator {
    /// # Arguments
    /// * `shutdown` - Cancelling it stops any scheduled retry
    pub fn new(
        tracker: Arc<ChangeTracker>,
        uploader: Arc<dyn IUploader>,
        options: CoordinatorOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tracker,
            uploader,
            options,
            phase: Mutex::new(SyncPhase::Idle),
            retry: tokio::sync::Mutex::new(RetryState::default()),
            session_id: RwLock::new(None),
            auth_token: RwLock::new(None),
            shutdown,
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    pub fn set_session_id(&self, session_id: Option<String>) {
        info!(has_session = session_id.is_some(), "Session id updated");
        *self.session_id.write().unwrap_or_else(PoisonError::into_inner) = session_id;
    }

    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn auth_token(&self) -> Option<String> {
        self.auth_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ========================================================================
    // Phase
    // ========================================================================

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Move to Syncing if the phase is currently `from`
    fn try_begin(&self, from: SyncPhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == from {
            *phase = SyncPhase::Syncing;
            true
        } else {
            false
        }
    }

    // ========================================================================
    // Cycles
    // ========================================================================

    /// Periodic trigger; a no-op unless a session is set and the phase is Idle
    pub async fn tick(self: &Arc<Self>) -> SyncOutcome {
        if self.session_id().is_none() {
            return SyncOutcome::NoSession;
        }
        if !self.try_begin(SyncPhase::Idle) {
            debug!(phase = %self.phase(), "Sync tick skipped");
            return SyncOutcome::Busy;
        }
        self.run_guarded().await
    }

    /// Attempt an upload now instead of waiting for the next tick
    pub async fn sync_now(self: &Arc<Self>) -> SyncOutcome {
        info!("Manual sync requested");
        let outcome = self.tick().await;
        info!(outcome = ?outcome, "Manual sync finished");
        outcome
    }

    /// Run a cycle, returning to Idle if the caller drops it midway
    ///
    /// The batch stays in the retry state until the service acknowledges it,
    /// so an abandoned cycle loses nothing and the next one re-sends it.
    async fn run_guarded(self: &Arc<Self>) -> SyncOutcome {
        let mut guard = CycleGuard {
            coordinator: self,
            completed: false,
        };
        let outcome = self.run_cycle().await;
        guard.completed = true;
        outcome
    }

    /// One upload attempt; the phase must already be Syncing
    async fn run_cycle(self: &Arc<Self>) -> SyncOutcome {
        let Some(session_id) = self.session_id() else {
            self.set_phase(SyncPhase::Idle);
            return SyncOutcome::NoSession;
        };
        let auth_token = self.auth_token();

        let mut retry = self.retry.lock().await;
        for fresh in self.tracker.check_for_changes().await {
            match retry.held.iter_mut().find(|held| held.path == fresh.path) {
                Some(held) => *held = fresh,
                None => retry.held.push(fresh),
            }
        }

        if retry.held.is_empty() {
            retry.attempts = 0;
            self.set_phase(SyncPhase::Idle);
            return SyncOutcome::Idle;
        }

        // Taken before reading so later edits keep a newer mtime than the stamp
        let started = Utc::now();
        let mut files = Vec::with_capacity(retry.held.len());
        for record in &retry.held {
            if let Some(file) = self.tracker.read_upload_file(&record.path).await {
                files.push(file);
            }
        }
        if files.is_empty() {
            warn!(batch = retry.held.len(), "No file in the batch could be read");
            retry.held.clear();
            retry.attempts = 0;
            self.set_phase(SyncPhase::Idle);
            return SyncOutcome::Idle;
        }

        debug!(files = files.len(), attempt = retry.attempts, "Uploading batch");
        match self
            .uploader
            .upload(&session_id, auth_token.as_deref(), &files)
            .await
        {
            Ok(()) => {
                retry.held.clear();
                for file in &files {
                    if let Err(e) = self.tracker.update_last_synced(&file.path, started).await {
                        warn!(path = %file.path.display(), error = %e, "Failed to record sync time");
                    }
                }
                retry.attempts = 0;
                self.set_phase(SyncPhase::Idle);
                info!(files = files.len(), "Batch synced");
                SyncOutcome::Synced { files: files.len() }
            }
            Err(e) if e.is_transient() && retry.attempts < self.options.max_retries => {
                retry.attempts += 1;
                let attempt = retry.attempts;
                let delay = self.options.retry_delay;
                self.set_phase(SyncPhase::Retrying);
                drop(retry);

                warn!(
                    attempt,
                    max_retries = self.options.max_retries,
                    delay_ms = duration_ms(delay),
                    error = %e,
                    "Upload failed, retrying"
                );
                self.schedule_retry(delay);
                SyncOutcome::Retrying { attempt, delay }
            }
            Err(e) => {
                let dropped = std::mem::take(&mut retry.held).len();
                let attempts = retry.attempts;
                retry.attempts = 0;
                self.set_phase(SyncPhase::Idle);
                error!(
                    files = dropped,
                    attempts,
                    error = %e,
                    "Upload failed, batch dropped"
                );
                SyncOutcome::Dropped {
                    files: dropped,
                    reason: e.to_string(),
                }
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        let this = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Scheduled retry cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    if this.try_begin(SyncPhase::Retrying) {
                        this.run_guarded().await;
                    }
                }
            }
        });
    }

    /// Cancel scheduled retries; a running upload is not interrupted
    pub fn dispose(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use ctxsync_core::domain::WorkspaceId;
    use ctxsync_core::ports::{InMemoryKeyValueStore, UploadError, UploadFile};
    use ctxsync_core::MetadataStore;

    use super::*;
    use crate::filter::PatternFilter;
    use crate::tracker::TrackerOptions;

    /// Replays scripted results, then succeeds
    #[derive(Default)]
    struct ScriptedUploader {
        script: Mutex<VecDeque<Result<(), UploadError>>>,
        calls: Mutex<Vec<Vec<PathBuf>>>,
        fail_always: Option<UploadError>,
        /// First call hangs this long before answering
        stall_first: Mutex<Option<Duration>>,
    }

    impl ScriptedUploader {
        fn failing(err: UploadError) -> Self {
            Self {
                fail_always: Some(err),
                ..Self::default()
            }
        }

        fn scripted(results: Vec<Result<(), UploadError>>) -> Self {
            Self {
                script: Mutex::new(results.into()),
                ..Self::default()
            }
        }

        fn stalling(stall: Duration) -> Self {
            Self {
                stall_first: Mutex::new(Some(stall)),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Vec<PathBuf>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IUploader for ScriptedUploader {
        async fn upload(
            &self,
            _session_id: &str,
            _auth_token: Option<&str>,
            files: &[UploadFile],
        ) -> Result<(), UploadError> {
            let stall = self.stall_first.lock().unwrap().take();
            if let Some(stall) = stall {
                tokio::time::sleep(stall).await;
            }
            self.calls
                .lock()
                .unwrap()
                .push(files.iter().map(|f| f.path.clone()).collect());
            if let Some(err) = &self.fail_always {
                return Err(err.clone());
            }
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        tracker: Arc<ChangeTracker>,
        uploader: Arc<ScriptedUploader>,
        coordinator: Arc<SyncCoordinator>,
    }

    fn fixture(uploader: ScriptedUploader, retry_delay: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let filter = Arc::new(PatternFilter::new(&root, &["**/*".to_string()], &[], false).unwrap());
        let store = Arc::new(MetadataStore::new(Arc::new(InMemoryKeyValueStore::new())));
        let tracker = Arc::new(ChangeTracker::new(
            WorkspaceId::new(root.clone()).unwrap(),
            filter,
            store,
            TrackerOptions::default(),
        ));
        let uploader = Arc::new(uploader);
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&tracker),
            Arc::clone(&uploader) as Arc<dyn IUploader>,
            CoordinatorOptions {
                max_retries: 3,
                retry_delay,
            },
            CancellationToken::new(),
        ));
        coordinator.set_session_id(Some("session-1".to_string()));
        Fixture {
            _dir: dir,
            root,
            tracker,
            uploader,
            coordinator,
        }
    }

    async fn track(fx: &Fixture, name: &str, content: &str) -> PathBuf {
        let path = fx.root.join(name);
        std::fs::write(&path, content).unwrap();
        fx.tracker.classify(&path).await;
        path
    }

    async fn wait_for_idle(coordinator: &SyncCoordinator) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.phase() != SyncPhase::Idle {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("coordinator did not return to idle");
    }

    fn last_synced(snapshot: &[FileMetadata], path: &Path) -> Option<chrono::DateTime<Utc>> {
        snapshot
            .iter()
            .find(|m| m.path == path)
            .and_then(|m| m.last_synced_at)
    }

    #[test]
    fn test_options_from_config() {
        let options = CoordinatorOptions::from(&SyncConfig::default());
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.retry_delay, Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_no_session_does_nothing() {
        let fx = fixture(ScriptedUploader::default(), Duration::ZERO);
        track(&fx, "a.ts", "a").await;
        fx.coordinator.set_session_id(None);

        assert_eq!(fx.coordinator.tick().await, SyncOutcome::NoSession);
        assert!(fx.uploader.calls().is_empty());
        assert_eq!(fx.tracker.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_pending_set_is_idle() {
        let fx = fixture(ScriptedUploader::default(), Duration::ZERO);
        assert_eq!(fx.coordinator.tick().await, SyncOutcome::Idle);
        assert!(fx.uploader.calls().is_empty());
        assert_eq!(fx.coordinator.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_success_stamps_whole_batch_with_one_timestamp() {
        let fx = fixture(ScriptedUploader::default(), Duration::ZERO);
        let a = track(&fx, "a.ts", "a").await;
        let b = track(&fx, "b.ts", "b").await;
        let c = track(&fx, "c.ts", "c").await;

        assert_eq!(fx.coordinator.sync_now().await, SyncOutcome::Synced { files: 3 });
        assert_eq!(fx.uploader.calls(), vec![vec![a.clone(), b.clone(), c.clone()]]);

        let snapshot = fx.tracker.snapshot().await;
        let stamp = last_synced(&snapshot, &a);
        assert!(stamp.is_some());
        assert_eq!(last_synced(&snapshot, &b), stamp);
        assert_eq!(last_synced(&snapshot, &c), stamp);
        assert_eq!(fx.tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_drops_without_retry() {
        let fx = fixture(
            ScriptedUploader::failing(UploadError::Permanent("invalid session".into())),
            Duration::ZERO,
        );
        track(&fx, "a.ts", "a").await;

        let outcome = fx.coordinator.tick().await;
        assert!(matches!(outcome, SyncOutcome::Dropped { files: 1, .. }));
        assert_eq!(fx.uploader.calls().len(), 1);
        assert_eq!(fx.coordinator.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_transient_failures_stop_after_three_retries() {
        let fx = fixture(
            ScriptedUploader::failing(UploadError::Transient("503 service unavailable".into())),
            Duration::from_millis(10),
        );
        track(&fx, "a.ts", "a").await;

        assert_eq!(
            fx.coordinator.tick().await,
            SyncOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_millis(10)
            }
        );
        wait_for_idle(&fx.coordinator).await;
        // settle any stray timer before counting
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fx.uploader.calls().len(), 4);
        assert_eq!(fx.tracker.pending_count().await, 0);

        // the dropped batch does not come back on the next tick
        assert_eq!(fx.coordinator.tick().await, SyncOutcome::Idle);
        assert_eq!(fx.uploader.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_retry_merges_newly_pending_files() {
        let fx = fixture(
            ScriptedUploader::scripted(vec![Err(UploadError::Transient("connection reset".into()))]),
            Duration::from_millis(100),
        );
        let a = track(&fx, "a.ts", "a").await;

        assert!(matches!(
            fx.coordinator.tick().await,
            SyncOutcome::Retrying { attempt: 1, .. }
        ));
        let b = track(&fx, "b.ts", "b").await;

        wait_for_idle(&fx.coordinator).await;
        assert_eq!(fx.uploader.calls(), vec![vec![a.clone()], vec![a, b]]);
        assert_eq!(fx.tracker.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_tick_while_retrying_is_busy() {
        let fx = fixture(
            ScriptedUploader::scripted(vec![Err(UploadError::Transient("timeout".into()))]),
            Duration::from_secs(60),
        );
        track(&fx, "a.ts", "a").await;

        fx.coordinator.tick().await;
        assert_eq!(fx.coordinator.phase(), SyncPhase::Retrying);
        assert_eq!(fx.coordinator.tick().await, SyncOutcome::Busy);
        assert_eq!(fx.coordinator.sync_now().await, SyncOutcome::Busy);
        assert_eq!(fx.uploader.calls().len(), 1);
        fx.coordinator.dispose();
    }

    #[tokio::test]
    async fn test_dispose_cancels_scheduled_retry() {
        let fx = fixture(
            ScriptedUploader::failing(UploadError::Transient("network unreachable".into())),
            Duration::from_millis(30),
        );
        track(&fx, "a.ts", "a").await;

        fx.coordinator.tick().await;
        fx.coordinator.dispose();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fx.uploader.calls().len(), 1);
        assert_eq!(fx.coordinator.phase(), SyncPhase::Retrying);
    }

    #[tokio::test]
    async fn test_unreadable_files_are_skipped() {
        let fx = fixture(ScriptedUploader::default(), Duration::ZERO);
        let a = track(&fx, "a.ts", "a").await;
        let b = track(&fx, "b.ts", "b").await;
        std::fs::remove_file(&b).unwrap();

        assert_eq!(fx.coordinator.tick().await, SyncOutcome::Synced { files: 1 });
        assert_eq!(fx.uploader.calls(), vec![vec![a]]);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_returns_to_idle_and_keeps_batch() {
        let fx = fixture(ScriptedUploader::stalling(Duration::from_secs(5)), Duration::ZERO);
        let a = track(&fx, "a.ts", "a").await;

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), fx.coordinator.sync_now()).await;
        assert!(cancelled.is_err());
        assert_eq!(fx.coordinator.phase(), SyncPhase::Idle);
        assert!(fx.uploader.calls().is_empty());

        assert_eq!(fx.coordinator.tick().await, SyncOutcome::Synced { files: 1 });
        assert_eq!(fx.uploader.calls(), vec![vec![a.clone()]]);
        assert!(last_synced(&fx.tracker.snapshot().await, &a).is_some());
        assert_eq!(fx.coordinator.phase(), SyncPhase::Idle);
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
