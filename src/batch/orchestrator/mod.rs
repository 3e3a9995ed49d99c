//! The batch engine: owns the queue, runs the worker pool and reports progress.
//!
//! `start` blocks the calling thread until the queue drains or `stop` is
//! requested from another thread, so callers usually share the orchestrator
//! behind an `Arc`.

mod control_loop;
mod progress_monitor;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::checkpoint::{CheckpointSnapshot, CheckpointStore, ResumePolicy};
use super::error::BatchError;
use super::ingest;
use super::queue::TaskQueue;
use super::report::{ProcessorConfig, ReportDocument};
use super::resources::{AdmissionLimits, ResourceMonitor, ResourceProbe, SystemProbe};
use super::retry::RetryCoordinator;
use super::state::RunState;
use super::stats::{ProgressSnapshot, RunSummary, TaskResult};
use super::task::{TaskConfig, TaskDescriptor, TaskId};
use super::transcode::{CancelFlag, Transcoder};
use crate::config::BatchSettings;

pub use progress_monitor::ProgressCallback;

/// How `stop` treats attempts that are already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Let in-flight attempts finish and record their outcomes.
    Wait,
    /// Cancel in-flight attempts and return without waiting for them.
    NoWait,
}

const STOP_NONE: u8 = 0;
const STOP_WAIT: u8 = 1;
const STOP_NO_WAIT: u8 = 2;

/// Runs queued transcode tasks across a bounded pool of worker threads.
pub struct Orchestrator {
    settings: BatchSettings,
    max_workers: usize,
    transcoder: Arc<dyn Transcoder>,
    resources: Arc<ResourceMonitor>,
    retry: RetryCoordinator,
    checkpoints: Option<CheckpointStore>,
    state: Arc<Mutex<RunState>>,
    running: AtomicBool,
    stop_request: AtomicU8,
    cancel: Mutex<CancelFlag>,
}

impl Orchestrator {
    /// Build an engine that samples the host with `sysinfo`.
    ///
    /// Checkpoints go to `settings.checkpoint_path`, or to the application
    /// checkpoints directory when unset; if neither is usable checkpointing
    /// is disabled with a warning.
    pub fn new(settings: BatchSettings, transcoder: Arc<dyn Transcoder>) -> Self {
        let settings = settings.normalized();
        let resources = ResourceMonitor::new(
            Box::new(SystemProbe::from_settings(&settings)),
            AdmissionLimits::from_settings(&settings),
        );
        let checkpoints = match &settings.checkpoint_path {
            Some(path) => Some(CheckpointStore::new(path)),
            None => match CheckpointStore::in_app_dir() {
                Ok(store) => Some(store),
                Err(err) => {
                    warn!("Checkpointing disabled: {err}");
                    None
                }
            },
        };
        let max_workers = settings.resolved_max_workers();
        info!(
            "Batch engine ready: {} workers, {:.1}GB memory limit, {:?} order",
            max_workers, settings.memory_limit_gb, settings.queue_order
        );
        Self {
            max_workers,
            transcoder,
            resources: Arc::new(resources),
            retry: RetryCoordinator::new(settings.retry_demotion),
            checkpoints,
            state: Arc::new(Mutex::new(RunState::new(settings.queue_order))),
            running: AtomicBool::new(false),
            stop_request: AtomicU8::new(STOP_NONE),
            cancel: Mutex::new(CancelFlag::new()),
            settings,
        }
    }

    /// Replace the resource probe, keeping the configured admission limits.
    pub fn with_resource_probe(mut self, probe: Box<dyn ResourceProbe>) -> Self {
        let limits = self.resources.limits();
        self.resources = Arc::new(ResourceMonitor::new(probe, limits));
        self
    }

    /// Replace the checkpoint store; `None` disables checkpointing.
    pub fn with_checkpoint_store(mut self, store: Option<CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn checkpoint_path(&self) -> Option<&Path> {
        self.checkpoints.as_ref().map(CheckpointStore::path)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queue a prepared descriptor as a new task.
    pub fn enqueue(&self, task: TaskDescriptor) -> TaskId {
        let id = task.id;
        debug!("[{}] Queued {} (priority {})", id.short(), task.display_name(), task.priority);
        self.lock_state().enqueue_new(task);
        id
    }

    /// Queue one input file; fails when the input does not exist.
    pub fn add_task(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        config: TaskConfig,
        priority: i64,
    ) -> Result<TaskId, BatchError> {
        let input = input.into();
        if !input.exists() {
            return Err(BatchError::InputMissing { path: input });
        }
        let task = TaskDescriptor::new(input, output, config, priority)
            .with_max_retries(self.settings.max_retries);
        Ok(self.enqueue(task))
    }

    /// Queue every matching video in `input_dir` using the configured extensions.
    pub fn add_folder(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        config: &TaskConfig,
        priority_by_size: bool,
    ) -> Result<Vec<TaskId>, BatchError> {
        self.add_folder_with_extensions(
            input_dir,
            output_dir,
            config,
            &self.settings.video_extensions,
            priority_by_size,
        )
    }

    /// Queue every file in `input_dir` whose extension is in `extensions`.
    ///
    /// Nothing is queued unless the whole directory could be scanned.
    pub fn add_folder_with_extensions(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        config: &TaskConfig,
        extensions: &[String],
        priority_by_size: bool,
    ) -> Result<Vec<TaskId>, BatchError> {
        let tasks = ingest::scan_folder(input_dir, output_dir, config, extensions, priority_by_size)?;
        let mut state = self.lock_state();
        Ok(tasks
            .into_iter()
            .map(|task| {
                let task = task.with_max_retries(self.settings.max_retries);
                let id = task.id;
                state.enqueue_new(task);
                id
            })
            .collect())
    }

    /// Request the current run to end. No effect when nothing is running.
    pub fn stop(&self, mode: StopMode) {
        if !self.is_running() {
            debug!("Stop requested while idle; ignoring");
            return;
        }
        let code = match mode {
            StopMode::Wait => STOP_WAIT,
            StopMode::NoWait => STOP_NO_WAIT,
        };
        self.stop_request.fetch_max(code, Ordering::AcqRel);
        if mode == StopMode::NoWait {
            self.cancel
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .cancel();
        }
        info!("Stop requested ({mode:?})");
    }

    /// Current progress including a fresh resource sample.
    pub fn progress(&self) -> ProgressSnapshot {
        progress_of(&self.state, &self.resources)
    }

    /// Counters plus derived durations once a run has ended.
    pub fn statistics(&self) -> RunSummary {
        RunSummary::from_stats(self.lock_state().stats.clone())
    }

    pub fn completed_tasks(&self) -> Vec<TaskResult> {
        self.lock_state().completed.clone()
    }

    pub fn failed_tasks(&self) -> Vec<TaskResult> {
        self.lock_state().failed.clone()
    }

    pub fn snapshot(&self) -> CheckpointSnapshot {
        self.lock_state().snapshot()
    }

    /// Write a checkpoint now. Returns false when checkpointing is disabled.
    pub fn save_checkpoint(&self) -> Result<bool, BatchError> {
        let Some(store) = &self.checkpoints else {
            return Ok(false);
        };
        let snapshot = self.snapshot();
        store.save(&snapshot)?;
        Ok(true)
    }

    /// Read the checkpoint file, if checkpointing is enabled and one exists.
    pub fn load_checkpoint(&self) -> Result<Option<CheckpointSnapshot>, BatchError> {
        match &self.checkpoints {
            Some(store) => Ok(store.load()?),
            None => Ok(None),
        }
    }

    /// Replace counters and result lists with a snapshot's.
    ///
    /// With [`ResumePolicy::RequeuePending`] the snapshot's pending tasks
    /// replace the current queue and will run on the next `start`.
    pub fn restore_checkpoint(
        &self,
        snapshot: CheckpointSnapshot,
        policy: ResumePolicy,
    ) -> Result<(), BatchError> {
        if self.is_running() {
            return Err(BatchError::AlreadyRunning);
        }
        let mut state = self.lock_state();
        state.stats = snapshot.stats;
        state.completed = snapshot.completed_tasks;
        state.failed = snapshot.failed_tasks;
        if policy == ResumePolicy::RequeuePending {
            state.queue = TaskQueue::new(self.settings.queue_order);
            state.in_flight.clear();
            state.stats.queued = 0;
            state.stats.processing = 0;
            for task in snapshot.pending_tasks {
                state.requeue(task);
            }
        }
        info!(
            "Restored checkpoint from {}: {} completed, {} failed, {} queued",
            snapshot.timestamp, state.stats.completed, state.stats.failed, state.stats.queued
        );
        Ok(())
    }

    /// Write a JSON report of the current state to `path`.
    pub fn export_report(&self, path: &Path) -> Result<(), BatchError> {
        let system_info = self.resources.sample();
        let (stats, completed_tasks, failed_tasks) = {
            let state = self.lock_state();
            (state.stats.clone(), state.completed.clone(), state.failed.clone())
        };
        let export_time = OffsetDateTime::now_utc();
        let report = ReportDocument {
            progress: ProgressSnapshot::compute(&stats, export_time, Some(system_info)),
            summary: RunSummary::from_stats(stats),
            completed_tasks,
            failed_tasks,
            system_info,
            export_time,
            processor_config: ProcessorConfig::new(
                self.max_workers,
                self.settings.memory_limit_gb,
                self.settings.queue_order,
            ),
        };
        report.write_to(path)?;
        info!("Report exported to {}", path.display());
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        lock_state(&self.state)
    }

    /// Save a checkpoint, logging rather than returning failures.
    fn checkpoint_quietly(&self) {
        if let Some(store) = &self.checkpoints {
            let snapshot = self.snapshot();
            match store.save(&snapshot) {
                Ok(()) => debug!("Checkpoint written to {}", store.path().display()),
                Err(err) => warn!("Checkpoint save failed: {err}"),
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("max_workers", &self.max_workers)
            .field("running", &self.is_running())
            .field("checkpoints", &self.checkpoints)
            .finish_non_exhaustive()
    }
}

fn lock_state(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|poisoned| {
        warn!("Run state lock poisoned; recovering.");
        poisoned.into_inner()
    })
}

fn progress_of(state: &Mutex<RunState>, resources: &ResourceMonitor) -> ProgressSnapshot {
    let sample = resources.sample();
    let stats = lock_state(state).stats.clone();
    ProgressSnapshot::compute(&stats, OffsetDateTime::now_utc(), Some(sample))
}
