//! Bounded-concurrency task scheduler.
//!
//! A small pool of worker loops claims pending tasks from the database in
//! FIFO order and drives one pipeline each. The pool size follows
//! `max_concurrent_tasks`; shrinking it never preempts a running task, the
//! surplus workers just exit at their next idle check.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SettingsStore;
use crate::db::tasks::{self, NewTask, Task, TaskStatus};
use crate::error::{AppError, Result};
use crate::events::ProgressBus;
use crate::llm;
use crate::pipeline::{self, PipelineContext, PipelineOutcome, TaskControl};

/// How long an idle worker sleeps before polling the queue again.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Executes one claimed task. The production runner drives the pipeline;
/// tests substitute stubs.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task, control: &TaskControl) -> Result<PipelineOutcome>;
}

/// Production runner: build the task's LLM adapter and run the pipeline.
pub struct PipelineRunner {
    pub ctx: PipelineContext,
}

#[async_trait]
impl TaskRunner for PipelineRunner {
    async fn run(&self, task: &Task, control: &TaskControl) -> Result<PipelineOutcome> {
        let settings = self.ctx.settings.snapshot();
        let adapter = llm::adapter_for(&task.llm_provider, &settings)?;
        pipeline::run(&self.ctx, task, control, adapter.as_ref()).await
    }
}

struct SchedulerState {
    running: bool,
    shutting_down: bool,
    max_concurrent: usize,
    workers_alive: usize,
    workers: Vec<JoinHandle<()>>,
    controls: HashMap<i64, TaskControl>,
}

pub struct TaskScheduler {
    db: SqlitePool,
    bus: ProgressBus,
    settings: Arc<SettingsStore>,
    runner: Arc<dyn TaskRunner>,
    scratch_root: PathBuf,
    state: Mutex<SchedulerState>,
    notify: Notify,
}

impl TaskScheduler {
    pub fn new(
        db: SqlitePool,
        bus: ProgressBus,
        settings: Arc<SettingsStore>,
        runner: Arc<dyn TaskRunner>,
        scratch_root: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            bus,
            settings,
            runner,
            scratch_root,
            state: Mutex::new(SchedulerState {
                running: false,
                shutting_down: false,
                max_concurrent: 0,
                workers_alive: 0,
                workers: Vec::new(),
                controls: HashMap::new(),
            }),
            notify: Notify::new(),
        })
    }

    /// Recover interrupted tasks and launch the worker pool.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let recovered = tasks::recover_processing(&self.db).await?;
        if recovered > 0 {
            info!(recovered, "Recovered interrupted tasks to pending");
        }

        let max = self.settings.snapshot().max_concurrent_tasks;
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        if state.running {
            return Ok(());
        }
        state.running = true;
        state.shutting_down = false;
        state.max_concurrent = max;
        while state.workers_alive < max {
            self.spawn_worker(&mut state);
        }
        info!(workers = max, "Task scheduler started");
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut SchedulerState) {
        state.workers.retain(|h| !h.is_finished());
        state.workers_alive += 1;
        let scheduler = Arc::clone(self);
        state.workers.push(tokio::spawn(async move {
            scheduler.worker_loop().await;
        }));
    }

    /// Apply a new worker-pool bound. Extra workers are spawned on increase;
    /// on decrease the surplus exits at the next idle check.
    pub fn set_max_concurrent(self: &Arc<Self>, max: usize) {
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        state.max_concurrent = max;
        if state.running {
            while state.workers_alive < max {
                self.spawn_worker(&mut state);
            }
        }
        drop(state);
        self.notify.notify_waiters();
        info!(max, "Worker pool bound updated");
    }

    async fn worker_loop(self: Arc<Self>) {
        debug!("Worker started");
        loop {
            {
                let mut state = self.state.lock().expect("scheduler lock poisoned");
                if !state.running || state.workers_alive > state.max_concurrent {
                    state.workers_alive -= 1;
                    break;
                }
            }

            let claimed = match tasks::claim_next_pending(&self.db).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!("Queue claim failed: {e}");
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                }
            };

            match claimed {
                Some(task_id) => self.run_claimed(task_id).await,
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
            }
        }
        debug!("Worker stopped");
    }

    async fn run_claimed(self: &Arc<Self>, task_id: i64) {
        let task = match tasks::get(&self.db, task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(task_id, "Claimed task vanished");
                return;
            }
            Err(e) => {
                error!(task_id, "Failed to load claimed task: {e}");
                return;
            }
        };

        let control = TaskControl::new();
        {
            let mut state = self.state.lock().expect("scheduler lock poisoned");
            state.controls.insert(task_id, control.clone());
        }
        info!(task_id, file = %task.file_name, "Worker picked up task");

        // The pipeline runs in its own spawn so a panic is trapped instead
        // of killing the worker.
        let runner = Arc::clone(&self.runner);
        let run_task = task.clone();
        let run_control = control.clone();
        let joined = tokio::spawn(async move { runner.run(&run_task, &run_control).await }).await;

        {
            let mut state = self.state.lock().expect("scheduler lock poisoned");
            state.controls.remove(&task_id);
        }

        let final_status = match joined {
            Err(join_error) => {
                error!(task_id, "Task worker panicked: {join_error}");
                self.persist_status(task_id, TaskStatus::Failed, Some("internal_error"))
                    .await;
                TaskStatus::Failed
            }
            Ok(Ok(PipelineOutcome::Completed { output_path })) => {
                info!(task_id, output = %output_path.display(), "Task completed");
                self.persist_status(task_id, TaskStatus::Completed, None).await;
                self.bus.progress(task_id, 100);
                TaskStatus::Completed
            }
            Ok(Ok(PipelineOutcome::Cancelled)) => {
                info!(task_id, "Task cancelled");
                self.persist_status(task_id, TaskStatus::Cancelled, None).await;
                TaskStatus::Cancelled
            }
            Ok(Ok(PipelineOutcome::Paused)) => {
                info!(task_id, "Task paused");
                self.persist_status(task_id, TaskStatus::Paused, None).await;
                TaskStatus::Paused
            }
            Ok(Err(e)) => {
                warn!(task_id, "Task failed: {e}");
                let message = e.to_string();
                self.persist_status(task_id, TaskStatus::Failed, Some(&message))
                    .await;
                TaskStatus::Failed
            }
        };
        self.bus.status(task_id, final_status);
    }

    async fn persist_status(&self, task_id: i64, status: TaskStatus, error: Option<&str>) {
        if let Err(e) = tasks::set_status(&self.db, task_id, status, error).await {
            error!(task_id, "Failed to persist status {status}: {e}");
        }
    }

    /// Enqueue a new task. Refused while shutting down and when an active
    /// task already exists for the same file/language pair.
    pub async fn submit(&self, new: NewTask) -> Result<Task> {
        {
            let state = self.state.lock().expect("scheduler lock poisoned");
            if state.shutting_down {
                return Err(AppError::User("scheduler is shutting down".to_string()));
            }
        }
        if tasks::has_active(&self.db, &new.file_path, &new.target_language).await? {
            return Err(AppError::User(format!(
                "An active task already exists for {} -> {}",
                new.file_path, new.target_language
            )));
        }

        let task = tasks::insert(&self.db, &new).await?;
        info!(task_id = task.id, file = %task.file_name, "Task enqueued");
        self.bus.new_task(task.id);
        self.notify.notify_waiters();
        Ok(task)
    }

    fn signal_cancel(&self, task_id: i64) -> bool {
        let state = self.state.lock().expect("scheduler lock poisoned");
        match state.controls.get(&task_id) {
            Some(control) => {
                control.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn signal_pause(&self, task_id: i64) -> bool {
        let state = self.state.lock().expect("scheduler lock poisoned");
        match state.controls.get(&task_id) {
            Some(control) => {
                control.pause.cancel();
                true
            }
            None => false,
        }
    }

    fn running_ids(&self) -> Vec<i64> {
        let state = self.state.lock().expect("scheduler lock poisoned");
        state.controls.keys().copied().collect()
    }

    /// Cancel a task: a running one is signaled and reaches `cancelled` at
    /// its next suspension point; a queued or paused one is marked directly.
    pub async fn cancel(&self, task_id: i64) -> Result<bool> {
        if self.signal_cancel(task_id) {
            return Ok(true);
        }
        match tasks::get_status(&self.db, task_id).await? {
            Some(TaskStatus::Pending) | Some(TaskStatus::Paused) => {
                tasks::set_status(&self.db, task_id, TaskStatus::Cancelled, None).await?;
                self.bus.status(task_id, TaskStatus::Cancelled);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Pause a task: a running one is signaled and checkpoints at the next
    /// chunk boundary; a pending one is parked directly.
    pub async fn pause(&self, task_id: i64) -> Result<bool> {
        if self.signal_pause(task_id) {
            return Ok(true);
        }
        let parked = tasks::pause_pending(&self.db, Some(&[task_id])).await?;
        if parked > 0 {
            self.bus.status(task_id, TaskStatus::Paused);
        }
        Ok(parked > 0)
    }

    /// Pause every pending task and signal every running one. Each item is
    /// handled independently; the total success count is returned.
    pub async fn pause_all(&self, ids: Option<&[i64]>) -> Result<u64> {
        let mut count = 0u64;
        for task_id in self.running_ids() {
            let selected = ids.map_or(true, |ids| ids.contains(&task_id));
            if selected && self.signal_pause(task_id) {
                count += 1;
            }
        }
        let parked = tasks::pause_pending(&self.db, ids).await?;
        count += parked;
        Ok(count)
    }

    /// Retry a failed/cancelled/paused task. A paused task with a checkpoint
    /// resumes where it stopped; anything else restarts from zero.
    pub async fn retry(&self, task_id: i64) -> Result<bool> {
        let status = tasks::get_status(&self.db, task_id).await?;
        let resumable = matches!(status, Some(TaskStatus::Paused))
            && pipeline::has_checkpoint(&self.scratch_root, task_id);

        let requeued = tasks::requeue(&self.db, task_id, !resumable).await?;
        if !requeued {
            return Ok(false);
        }
        if !resumable {
            let _ = tokio::fs::remove_dir_all(self.scratch_root.join(task_id.to_string())).await;
        }
        self.bus.status(task_id, TaskStatus::Pending);
        self.notify.notify_waiters();
        Ok(true)
    }

    /// Delete a task. A running one is cancelled instead (its row survives
    /// as a tombstone); anything else is removed together with its scratch.
    pub async fn delete(&self, task_id: i64) -> Result<bool> {
        if tasks::get_status(&self.db, task_id).await?.is_none() {
            return Ok(false);
        }
        if self.signal_cancel(task_id) {
            return Ok(true);
        }
        tasks::delete(&self.db, task_id).await?;
        let _ = tokio::fs::remove_dir_all(self.scratch_root.join(task_id.to_string())).await;
        Ok(true)
    }

    /// Batch delete: running tasks are cancelled, the rest are removed.
    /// Returns `(cancelled_count, deleted_count)`.
    pub async fn delete_all(&self, ids: Option<&[i64]>) -> Result<(u64, u64)> {
        let mut cancelled = 0u64;
        for task_id in self.running_ids() {
            let selected = ids.map_or(true, |ids| ids.contains(&task_id));
            if selected && self.signal_cancel(task_id) {
                cancelled += 1;
            }
        }
        let deleted = tasks::delete_non_processing(&self.db, ids).await?;
        Ok((cancelled, deleted))
    }

    /// Drain for shutdown: refuse new work, ask running tasks to pause (their
    /// checkpoints persist), then wait for the workers to exit.
    pub async fn shutdown(&self) {
        info!("Scheduler draining for shutdown");
        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.state.lock().expect("scheduler lock poisoned");
            state.running = false;
            state.shutting_down = true;
            for control in state.controls.values() {
                control.pause.cancel();
            }
            state.workers.drain(..).collect()
        };
        self.notify.notify_waiters();
        for handle in handles {
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }
}
