//! Directory watcher supervisor.
//!
//! Each enabled watcher gets its own recursive filesystem subscription; all
//! of them feed one shared candidate channel. A reader task debounces every
//! candidate until its size stops changing (partial writes settle), then
//! consults the skip oracle and submits a task.
//!
//! Enabling a watcher also runs a one-shot, non-recursive scan of files
//! already present in the directory.

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SettingsStore;
use crate::db::tasks::NewTask;
use crate::db::watchers::{self, Watcher};
use crate::error::{AppError, Result};
use crate::lang;
use crate::scheduler::TaskScheduler;
use crate::skip::{SkipDecision, SkipOracle};

/// Poll interval while waiting for a new file's size to settle.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_secs(2);
/// Give up on a file that never stops growing (uploads gone wrong).
const DEBOUNCE_MAX_CHECKS: u32 = 900;

const WATCHED_EXTENSIONS: &[&str] = &["mkv", "srt", "ass"];

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    target_language: String,
    llm_provider: String,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ScanStats {
    pub scanned: usize,
    pub triggered: usize,
}

struct SupervisorState {
    handles: HashMap<i64, RecommendedWatcher>,
    debouncing: HashSet<PathBuf>,
}

pub struct WatcherSupervisor {
    db: SqlitePool,
    scheduler: Arc<TaskScheduler>,
    oracle: Arc<SkipOracle>,
    settings: Arc<SettingsStore>,
    tx: mpsc::UnboundedSender<Candidate>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Candidate>>>,
    state: Mutex<SupervisorState>,
    debounce_interval: Duration,
}

impl WatcherSupervisor {
    pub fn new(
        db: SqlitePool,
        scheduler: Arc<TaskScheduler>,
        oracle: Arc<SkipOracle>,
        settings: Arc<SettingsStore>,
    ) -> Arc<Self> {
        Self::with_debounce(db, scheduler, oracle, settings, DEBOUNCE_INTERVAL)
    }

    pub fn with_debounce(
        db: SqlitePool,
        scheduler: Arc<TaskScheduler>,
        oracle: Arc<SkipOracle>,
        settings: Arc<SettingsStore>,
        debounce_interval: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            db,
            scheduler,
            oracle,
            settings,
            tx,
            rx: Mutex::new(Some(rx)),
            state: Mutex::new(SupervisorState {
                handles: HashMap::new(),
                debouncing: HashSet::new(),
            }),
            debounce_interval,
        })
    }

    /// Launch the shared event reader and bring up every enabled watcher
    /// (live monitor plus startup scan). Individual watcher failures are
    /// logged and do not block the rest.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let rx = self
            .rx
            .lock()
            .expect("supervisor lock poisoned")
            .take()
            .ok_or_else(|| AppError::Config("watcher supervisor already started".to_string()))?;
        let supervisor = Arc::clone(self);
        tokio::spawn(async move { supervisor.event_loop(rx).await });

        for watcher in watchers::list_enabled(&self.db).await? {
            if let Err(e) = self.enable(&watcher).await {
                error!(watcher_id = watcher.id, path = %watcher.path, "Failed to start watcher: {e}");
            }
        }
        Ok(())
    }

    /// Start the live monitor for one watcher and scan its directory once.
    pub async fn enable(self: &Arc<Self>, watcher: &Watcher) -> Result<ScanStats> {
        self.start_monitor(watcher)?;
        let stats = self.scan(watcher).await;
        info!(
            watcher_id = watcher.id,
            path = %watcher.path,
            scanned = stats.scanned,
            triggered = stats.triggered,
            "Watcher enabled"
        );
        Ok(stats)
    }

    /// Stop the live monitor for one watcher.
    pub fn disable(&self, watcher_id: i64) {
        let mut state = self.state.lock().expect("supervisor lock poisoned");
        if state.handles.remove(&watcher_id).is_some() {
            info!(watcher_id, "Watcher disabled");
        }
    }

    fn start_monitor(&self, watcher: &Watcher) -> Result<()> {
        let path = PathBuf::from(&watcher.path);
        if !path.is_dir() {
            return Err(AppError::User(format!(
                "Path is not a directory: {}",
                watcher.path
            )));
        }

        let tx = self.tx.clone();
        let target_language = watcher.target_language.clone();
        let llm_provider = watcher.llm_provider.clone();
        let mut handle = notify::recommended_watcher(
            move |result: notify::Result<notify::Event>| match result {
                Ok(event) => {
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_)
                            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
                    );
                    if relevant {
                        for path in event.paths {
                            let _ = tx.send(Candidate {
                                path,
                                target_language: target_language.clone(),
                                llm_provider: llm_provider.clone(),
                            });
                        }
                    }
                }
                Err(e) => warn!("Filesystem watch error: {e}"),
            },
        )
        .map_err(|e| AppError::Config(format!("failed to create watcher: {e}")))?;

        handle
            .watch(&path, RecursiveMode::Recursive)
            .map_err(|e| AppError::Config(format!("failed to watch {}: {e}", path.display())))?;

        let mut state = self.state.lock().expect("supervisor lock poisoned");
        state.handles.insert(watcher.id, handle);
        Ok(())
    }

    /// One-shot scan of files already present under the watcher's directory
    /// (top level only; the live monitor covers subdirectories from now on).
    pub async fn scan(self: &Arc<Self>, watcher: &Watcher) -> ScanStats {
        let mut stats = ScanStats::default();
        let entries = match std::fs::read_dir(&watcher.path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %watcher.path, "Cannot scan watch directory: {e}");
                return stats;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %watcher.path, "Skipping unreadable entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !is_candidate_file(&path) {
                continue;
            }
            stats.scanned += 1;
            if self
                .evaluate_and_submit(&path, &watcher.target_language, &watcher.llm_provider)
                .await
            {
                stats.triggered += 1;
            }
        }
        stats
    }

    async fn event_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Candidate>) {
        while let Some(candidate) = rx.recv().await {
            if !is_candidate_file(&candidate.path) {
                continue;
            }
            {
                let mut state = self.state.lock().expect("supervisor lock poisoned");
                if !state.debouncing.insert(candidate.path.clone()) {
                    continue;
                }
            }
            let supervisor = Arc::clone(&self);
            tokio::spawn(async move {
                supervisor.debounce_and_submit(candidate.clone()).await;
                let mut state = supervisor.state.lock().expect("supervisor lock poisoned");
                state.debouncing.remove(&candidate.path);
            });
        }
        debug!("Watcher event loop ended");
    }

    async fn debounce_and_submit(&self, candidate: Candidate) {
        debug!(path = %candidate.path.display(), "New file detected, waiting for stable size");
        if !wait_for_stable_size(&candidate.path, self.debounce_interval, DEBOUNCE_MAX_CHECKS).await
        {
            warn!(path = %candidate.path.display(), "File never settled, ignoring");
            return;
        }
        self.evaluate_and_submit(
            &candidate.path,
            &candidate.target_language,
            &candidate.llm_provider,
        )
        .await;
    }

    async fn evaluate_and_submit(
        &self,
        path: &Path,
        target_language: &str,
        llm_provider: &str,
    ) -> bool {
        let settings = self.settings.snapshot();
        match self
            .oracle
            .evaluate(path, target_language, false, &settings)
            .await
        {
            Ok(SkipDecision::Proceed) => {}
            Ok(SkipDecision::Skip(reason)) => {
                debug!(path = %path.display(), %reason, "Watcher skipped file");
                return false;
            }
            Err(e) => {
                warn!(path = %path.display(), "Skip evaluation failed: {e}");
                return false;
            }
        }

        let new = NewTask {
            file_path: path.to_string_lossy().into_owned(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            target_language: target_language.to_string(),
            llm_provider: llm_provider.to_string(),
            subtitle_track: None,
            force_override: false,
        };
        match self.scheduler.submit(new).await {
            Ok(task) => {
                info!(task_id = task.id, path = %path.display(), "Watcher created task");
                true
            }
            Err(e) => {
                debug!(path = %path.display(), "Watcher submit refused: {e}");
                false
            }
        }
    }
}

/// A file the watchers care about: right extension and not one of our own
/// generated outputs.
fn is_candidate_file(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    WATCHED_EXTENSIONS.contains(&ext.to_lowercase().as_str()) && !lang::is_generated_output(&name)
}

/// Poll a file's size until two consecutive observations match. Returns
/// false when the file disappears or never settles.
pub async fn wait_for_stable_size(path: &Path, interval: Duration, max_checks: u32) -> bool {
    let mut last_size: Option<u64> = None;
    for _ in 0..max_checks {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };
        if last_size == Some(size) {
            return true;
        }
        last_size = Some(size);
        tokio::time::sleep(interval).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsStore;
    use crate::db::{self, tasks};
    use crate::error::Result as AppResult;
    use crate::events::ProgressBus;
    use crate::media::{MediaToolbox, SubtitleTrack};
    use crate::scheduler::{TaskRunner, TaskScheduler};
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    struct NoTracksToolbox;

    #[async_trait]
    impl MediaToolbox for NoTracksToolbox {
        async fn list_tracks(&self, _path: &Path) -> AppResult<Vec<SubtitleTrack>> {
            Ok(Vec::new())
        }
        async fn extract_track(
            &self,
            _path: &Path,
            _track_index: i64,
            _scratch: &Path,
        ) -> AppResult<PathBuf> {
            unimplemented!()
        }
        async fn merge_subtitle(
            &self,
            _mkv_in: &Path,
            _mkv_out: &Path,
            _subtitle: &Path,
            _language_code: &str,
            _track_name: &str,
            _default_flag: bool,
        ) -> AppResult<()> {
            unimplemented!()
        }
        async fn replace_in_place(
            &self,
            _mkv: &Path,
            _subtitle: &Path,
            _language_code: &str,
            _track_name: &str,
            _default_flag: bool,
        ) -> AppResult<()> {
            unimplemented!()
        }
    }

    struct IdleRunner;

    #[async_trait]
    impl TaskRunner for IdleRunner {
        async fn run(
            &self,
            _task: &tasks::Task,
            _control: &crate::pipeline::TaskControl,
        ) -> AppResult<crate::pipeline::PipelineOutcome> {
            Ok(crate::pipeline::PipelineOutcome::Cancelled)
        }
    }

    async fn supervisor(dir: &TempDir) -> (Arc<WatcherSupervisor>, SqlitePool) {
        let pool = db::test_pool().await;
        let store = Arc::new(SettingsStore::load(pool.clone()).await.unwrap());
        let toolbox: Arc<dyn MediaToolbox> = Arc::new(NoTracksToolbox);
        let oracle = Arc::new(SkipOracle::new(pool.clone(), toolbox));
        let scheduler = TaskScheduler::new(
            pool.clone(),
            ProgressBus::default(),
            store.clone(),
            Arc::new(IdleRunner),
            dir.path().join("scratch"),
        );
        let supervisor = WatcherSupervisor::with_debounce(
            pool.clone(),
            scheduler,
            oracle,
            store,
            Duration::from_millis(10),
        );
        (supervisor, pool)
    }

    fn watcher_row(path: &Path) -> Watcher {
        Watcher {
            id: 1,
            path: path.to_string_lossy().into_owned(),
            enabled: true,
            target_language: "Chinese".to_string(),
            llm_provider: "openai".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_candidate_filter() {
        assert!(is_candidate_file(Path::new("/m/a.mkv")));
        assert!(is_candidate_file(Path::new("/m/a.SRT")));
        assert!(is_candidate_file(Path::new("/m/a.ass")));
        assert!(!is_candidate_file(Path::new("/m/a.mp4")));
        assert!(!is_candidate_file(Path::new("/m/a.translated.mkv")));
        assert!(!is_candidate_file(Path::new("/m/a.zh-Hans.srt")));
        assert!(!is_candidate_file(Path::new("/m/noext")));
    }

    #[tokio::test]
    async fn test_scan_is_non_recursive_and_filters_generated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.srt"), "1\n00:00:01,000 --> 00:00:02,000\nHi\n\n").unwrap();
        std::fs::write(dir.path().join("a.zh-Hans.srt"), "generated").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.srt"), "nested").unwrap();

        let (supervisor, pool) = supervisor(&dir).await;
        let stats = supervisor.scan(&watcher_row(dir.path())).await;

        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.triggered, 1);
        let (tasks, total) = tasks::list(&pool, None, 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(tasks[0].file_name, "a.srt");
    }

    #[tokio::test]
    async fn test_scan_does_not_duplicate_active_tasks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.srt"), "x").unwrap();

        let (supervisor, pool) = supervisor(&dir).await;
        let row = watcher_row(dir.path());
        let first = supervisor.scan(&row).await;
        assert_eq!(first.triggered, 1);

        // Second scan sees the active task and creates nothing.
        let second = supervisor.scan(&row).await;
        assert_eq!(second.triggered, 0);
        let (_, total) = tasks::list(&pool, None, 10, 0).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_monitor_requires_directory() {
        let dir = TempDir::new().unwrap();
        let (supervisor, _pool) = supervisor(&dir).await;
        let missing = watcher_row(&dir.path().join("not-here"));
        assert!(supervisor.start_monitor(&missing).is_err());
    }

    #[tokio::test]
    async fn test_wait_for_stable_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.mkv");
        std::fs::write(&path, b"start").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let mut content = std::fs::read(&writer_path).unwrap();
                content.extend_from_slice(b"more");
                std::fs::write(&writer_path, content).unwrap();
            }
        });

        assert!(wait_for_stable_size(&path, Duration::from_millis(20), 100).await);
        writer.await.unwrap();

        assert!(!wait_for_stable_size(Path::new("/no/such/file"), Duration::from_millis(1), 3).await);
    }
}
