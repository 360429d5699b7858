//! Live session orchestration.
//!
//! Owns the session lifecycle: create/load, launch the transcoder, watch the
//! session directory for new segments, apply the lookahead-readiness rule,
//! fan uploads out across the configured backends and resolve the
//! start-readiness signal on the first fully replicated segment.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::model::{Session, VideoQuality, Watermark};
use crate::playlist::PlaylistBuilder;
use crate::storage::local::remove_dir_tolerant;
use crate::storage::BackendRegistry;
use crate::store::{SessionLocks, SessionStore};
use crate::transcoder::TranscoderManager;

/// Delay between lookahead polls while a segment is still being flushed.
const SEGMENT_PROCESSING_DELAY: Duration = Duration::from_millis(500);

/// Attempts at registering the directory watch before giving up.
const WATCH_SETUP_ATTEMPTS: u32 = 3;
const WATCH_SETUP_BACKOFF: Duration = Duration::from_secs(1);

/// The start-readiness signal: resolved exactly once per start call, either
/// with the first fully replicated segment or with a setup error.
type ReadySignal = Arc<parking_lot::Mutex<Option<oneshot::Sender<Result<()>>>>>;

fn resolve_ready(signal: &ReadySignal, result: Result<()>) {
    if let Some(tx) = signal.lock().take() {
        let _ = tx.send(result);
    }
}

fn live_segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^segment_(\d+)\.ts$").expect("valid regex"))
}

/// `segment_12.ts` with lookahead 2 → `segment_14.ts`. `None` when the name
/// does not carry a live-segment sequence (advertisement files and friends).
fn lookahead_name(segment_name: &str, lookahead: u32) -> Option<String> {
    let caps = live_segment_regex().captures(segment_name)?;
    let sequence: u64 = caps.get(1)?.as_str().parse().ok()?;
    Some(format!("segment_{}.ts", sequence + u64::from(lookahead)))
}

pub struct StreamOrchestrator {
    config: StreamConfig,
    store: Arc<dyn SessionStore>,
    registry: Arc<BackendRegistry>,
    transcoder: Arc<TranscoderManager>,
    playlist: Arc<PlaylistBuilder>,
    locks: Arc<SessionLocks>,
    /// Live watch handles per session; dropping one unblocks its watch loop.
    watchers: DashMap<String, RecommendedWatcher>,
    /// Bounds concurrent uploads; sized for I/O-bound work.
    upload_slots: Arc<Semaphore>,
    /// Tracks every spawned pipeline task for drain-on-shutdown.
    tasks: TaskTracker,
}

impl StreamOrchestrator {
    pub fn new(
        config: StreamConfig,
        store: Arc<dyn SessionStore>,
        registry: Arc<BackendRegistry>,
        transcoder: Arc<TranscoderManager>,
        playlist: Arc<PlaylistBuilder>,
        locks: Arc<SessionLocks>,
    ) -> Arc<Self> {
        let upload_slots = Arc::new(Semaphore::new(num_cpus::get() * 4));
        Arc::new(Self {
            config,
            store,
            registry,
            transcoder,
            playlist,
            locks,
            watchers: DashMap::new(),
            upload_slots,
            tasks: TaskTracker::new(),
        })
    }

    /// Starts (or reuses) a session and waits for the first segment to be
    /// fully replicated, bounded by the configured start timeout.
    ///
    /// Idempotent on the session id: an existing session is reused, and an
    /// already-running one returns immediately. Sessions scheduled for the
    /// future are persisted and left for the scheduler poller.
    pub async fn start(
        self: &Arc<Self>,
        source_url: &str,
        backend_names: &[String],
        quality: VideoQuality,
        watermark: Option<Watermark>,
        scheduled_start: Option<DateTime<Utc>>,
        session_id: Option<String>,
    ) -> Result<Session> {
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let backends = self.registry.filter_available(backend_names);
        if backends.is_empty() {
            return Err(Error::InvalidInput(
                "no configured storage backend matches the request".to_string(),
            ));
        }

        let session = Session::new(
            id,
            source_url,
            backends,
            quality,
            scheduled_start,
            watermark,
        );
        let session = self.store.insert_if_absent(session).await;

        if session.active || session.processing {
            tracing::info!(session_id = %session.id, "Session already running; reusing it");
            return Ok(session);
        }

        if let Some(at) = session.scheduled_start {
            if at > Utc::now() {
                tracing::info!(session_id = %session.id, start = %at, "Session scheduled for later start");
                return Ok(session);
            }
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let ready: ReadySignal = Arc::new(parking_lot::Mutex::new(Some(ready_tx)));
        let first_segment_done = Arc::new(AtomicBool::new(false));

        self.spawn_session_pipeline(session.clone(), ready, first_segment_done);

        let timeout = Duration::from_secs(self.config.start_timeout_secs);
        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!(session_id = %session.id, "Stream is ready");
                let session = self.store.get(&session.id).await.unwrap_or(session);
                Ok(session)
            }
            Ok(Ok(Err(e))) => {
                tracing::error!(session_id = %session.id, "Stream setup failed: {e}");
                self.stop(&session.id).await;
                Err(e)
            }
            Ok(Err(_)) | Err(_) => {
                tracing::warn!(
                    session_id = %session.id,
                    timeout_secs = self.config.start_timeout_secs,
                    "Stream did not become ready in time; stopping"
                );
                self.stop(&session.id).await;
                Err(Error::StartTimeout(self.config.start_timeout_secs))
            }
        }
    }

    /// Stops a session: best-effort and idempotent. Marks it inactive, kills
    /// the transcoder, deletes remote objects per backend, removes local
    /// files and drops the session from the store. Unknown ids are a no-op
    /// beyond directory cleanup.
    pub async fn stop(&self, session_id: &str) {
        if let Some(mut session) = self.store.get(session_id).await {
            session.active = false;
            session.processing = false;
            self.store.save(&session).await;

            self.transcoder.stop_process(session_id).await;

            for backend in self.registry.resolve(&session.backends) {
                let id = session_id.to_string();
                self.tasks.spawn(async move {
                    if let Err(e) = backend.delete_session(&id).await {
                        tracing::error!(
                            session_id = %id,
                            backend = backend.name(),
                            "Failed to delete session objects: {e}"
                        );
                    }
                });
            }

            self.store.delete(session_id).await;
            tracing::info!(session_id = %session_id, "Session stopped");
        }

        self.watchers.remove(session_id);
        self.locks.release(session_id);
        remove_dir_tolerant(&self.session_dir(session_id));
    }

    /// Stops accepting background work, waits for in-flight tasks to drain
    /// and gives up after `grace` (the runtime cancels stragglers on drop).
    pub async fn shutdown(&self, grace: Duration) {
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            tracing::warn!("Background tasks did not drain in time");
        }
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.config.streams_root.join(session_id)
    }

    fn spawn_session_pipeline(
        self: &Arc<Self>,
        session: Session,
        ready: ReadySignal,
        first_segment_done: Arc<AtomicBool>,
    ) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            this.run_session_pipeline(session, ready, first_segment_done)
                .await;
        });
    }

    /// Creates the session directory, launches the transcoder and the watch
    /// loop. Setup failures resolve the readiness signal with an error; the
    /// caller compensates with `stop`.
    async fn run_session_pipeline(
        self: Arc<Self>,
        session: Session,
        ready: ReadySignal,
        first_segment_done: Arc<AtomicBool>,
    ) {
        let session_dir = self.session_dir(&session.id);

        let setup: Result<()> = async {
            tokio::fs::create_dir_all(&session_dir)
                .await
                .map_err(|e| Error::Setup(format!("failed to create session directory: {e}")))?;

            // Transcoder supervision runs for the whole session lifetime;
            // when it ends, dropping the watch handle closes the event
            // channel and the watch loop exits with it.
            let output_pattern = session_dir.join("segment_%d.ts");
            {
                let this = Arc::clone(&self);
                let session = session.clone();
                let ready = ready.clone();
                self.tasks.spawn(async move {
                    let result = this
                        .transcoder
                        .start_processing(
                            &session.id,
                            &session.source_url,
                            &output_pattern,
                            session.quality,
                            session.watermark.as_ref(),
                        )
                        .await;
                    if let Err(e) = result {
                        tracing::error!(session_id = %session.id, "Transcoder failed: {e}");
                        resolve_ready(&ready, Err(e));
                    }
                    this.watchers.remove(&session.id);
                });
            }

            let (event_tx, event_rx) = mpsc::channel::<PathBuf>(256);
            let watcher = register_watch(&session_dir, event_tx).await?;
            self.watchers.insert(session.id.clone(), watcher);

            if let Some(mut session) = self.store.get(&session.id).await {
                session.active = true;
                self.store.save(&session).await;
            }

            let this = Arc::clone(&self);
            let session_id = session.id.clone();
            let dir = session_dir.clone();
            let ready = ready.clone();
            let first = first_segment_done.clone();
            self.tasks.spawn(async move {
                this.watch_loop(session_id, dir, event_rx, ready, first).await;
            });

            Ok(())
        }
        .await;

        if let Err(e) = setup {
            tracing::error!(session_id = %session.id, "Session setup failed: {e}");
            resolve_ready(&ready, Err(e));
        }
    }

    /// Drains directory events while the session is active. Exits when the
    /// event channel closes (watch handle dropped on stop or transcoder
    /// exit) or the session goes inactive; both are loop exit, not failure.
    async fn watch_loop(
        self: Arc<Self>,
        session_id: String,
        session_dir: PathBuf,
        mut events: mpsc::Receiver<PathBuf>,
        ready: ReadySignal,
        first_segment_done: Arc<AtomicBool>,
    ) {
        while let Some(path) = events.recv().await {
            match self.store.get(&session_id).await {
                Some(session) if session.active => {}
                _ => break,
            }

            let Some(segment_name) = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(String::from)
            else {
                continue;
            };

            // Advertisement segments are pre-packaged complete files; only
            // live segments wait for the lookahead.
            if segment_name.starts_with("segment")
                && !self
                    .wait_for_lookahead(&session_id, &session_dir, &segment_name)
                    .await
            {
                break;
            }

            tracing::info!(
                session_id = %session_id,
                segment = %segment_name,
                "Segment ready for upload"
            );

            let this = Arc::clone(&self);
            let id = session_id.clone();
            let ready = ready.clone();
            let first = first_segment_done.clone();
            self.tasks.spawn(async move {
                this.process_segment(id, path, segment_name, ready, first)
                    .await;
            });
        }
        tracing::debug!(session_id = %session_id, "Segment watch loop exited");
    }

    /// Waits until the segment `lookahead_count` positions later exists on
    /// disk, proving the transcoder has moved on and flushed this one.
    /// Returns `false` if the session went inactive while waiting.
    async fn wait_for_lookahead(
        &self,
        session_id: &str,
        session_dir: &Path,
        segment_name: &str,
    ) -> bool {
        let Some(next_name) = lookahead_name(segment_name, self.config.lookahead_count) else {
            return true;
        };
        let next_path = session_dir.join(next_name);
        loop {
            if next_path.exists() {
                return true;
            }
            match self.store.get(session_id).await {
                Some(session) if session.active => {}
                _ => return false,
            }
            tokio::time::sleep(SEGMENT_PROCESSING_DELAY).await;
        }
    }

    /// Uploads one segment to every backend of the session, publishes it to
    /// the playlist when all uploads succeed and resolves the readiness
    /// signal for the first such segment. Failures are logged and isolated:
    /// a failed segment simply never appears in the manifest.
    async fn process_segment(
        self: Arc<Self>,
        session_id: String,
        segment_path: PathBuf,
        segment_name: String,
        ready: ReadySignal,
        first_segment_done: Arc<AtomicBool>,
    ) {
        let _permit = match self.upload_slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!(
                    session_id = %session_id,
                    segment = %segment_name,
                    "Upload pool closed; segment dropped"
                );
                return;
            }
        };

        match tokio::fs::metadata(&segment_path).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => {
                tracing::warn!(
                    session_id = %session_id,
                    segment = %segment_name,
                    "Skipping empty or missing segment"
                );
                return;
            }
        }

        let Some(session) = self.store.get(&session_id).await else {
            return;
        };
        let backends = self.registry.resolve(&session.backends);

        let uploads = backends
            .iter()
            .map(|backend| backend.upload_segment(&segment_path, &session_id));
        let results = join_all(uploads).await;

        let mut any_failed = false;
        for (backend, result) in backends.iter().zip(&results) {
            if let Err(e) = result {
                any_failed = true;
                tracing::error!(
                    session_id = %session_id,
                    segment = %segment_name,
                    backend = backend.name(),
                    "Segment upload failed: {e}"
                );
            }
        }
        if any_failed {
            return;
        }

        self.playlist.add_segment(&session_id, &segment_name).await;

        if first_segment_done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            resolve_ready(&ready, Ok(()));
        }
        tracing::debug!(session_id = %session_id, segment = %segment_name, "Segment processed");
    }
}

/// Registers a creation watch on the session directory, retrying a bounded
/// number of times with a fixed backoff.
async fn register_watch(
    session_dir: &Path,
    event_tx: mpsc::Sender<PathBuf>,
) -> Result<RecommendedWatcher> {
    let mut last_error = None;
    for attempt in 1..=WATCH_SETUP_ATTEMPTS {
        match try_watch(session_dir, event_tx.clone()) {
            Ok(watcher) => return Ok(watcher),
            Err(e) => {
                tracing::warn!(
                    attempt,
                    max = WATCH_SETUP_ATTEMPTS,
                    "Failed to register directory watch, retrying: {}",
                    e
                );
                last_error = Some(e);
                tokio::time::sleep(WATCH_SETUP_BACKOFF).await;
            }
        }
    }
    Err(Error::Setup(format!(
        "failed to watch session directory {}: {}",
        session_dir.display(),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

fn try_watch(
    session_dir: &Path,
    event_tx: mpsc::Sender<PathBuf>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            if let Ok(event) = result {
                if matches!(event.kind, EventKind::Create(_)) {
                    for path in event.paths {
                        let _ = event_tx.blocking_send(path);
                    }
                }
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(session_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookahead_name() {
        assert_eq!(
            lookahead_name("segment_12.ts", 2).as_deref(),
            Some("segment_14.ts")
        );
        assert_eq!(
            lookahead_name("segment_0.ts", 1).as_deref(),
            Some("segment_1.ts")
        );
        assert_eq!(lookahead_name("advertisement_3.ts", 2), None);
        assert_eq!(lookahead_name("garbage.ts", 2), None);
    }
}
