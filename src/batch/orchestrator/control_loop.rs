use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{error, info, warn};

use super::progress_monitor::{ProgressCallback, ProgressMonitor};
use super::worker::{Completion, WorkerContext, WorkerPool};
use super::{
    Orchestrator, STOP_NO_WAIT, STOP_NONE, STOP_WAIT, StopMode, lock_state, progress_of,
};
use crate::batch::error::BatchError;
use crate::batch::retry::RetryDecision;
use crate::batch::stats::RunSummary;
use crate::batch::transcode::CancelFlag;

impl Orchestrator {
    /// Run until the queue drains or `stop` is called, then return the run summary.
    ///
    /// Fails without touching state when a run is already active or nothing is queued.
    pub fn start(&self, progress: Option<ProgressCallback>) -> Result<RunSummary, BatchError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BatchError::AlreadyRunning);
        }
        // A stop that raced the end of the previous run must not end this one.
        self.stop_request.store(STOP_NONE, Ordering::Release);
        let queued = {
            let mut state = self.lock_state();
            if state.queue.is_empty() {
                drop(state);
                self.running.store(false, Ordering::Release);
                return Err(BatchError::EmptyQueue);
            }
            if state.stats.started_at.is_none() {
                state.stats.started_at = Some(OffsetDateTime::now_utc());
            }
            state.stats.ended_at = None;
            state.queue.len()
        };
        let cancel = CancelFlag::new();
        *self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = cancel.clone();
        info!("Starting batch of {queued} task(s) on {} worker(s)", self.max_workers);

        let monitor = progress.map(|callback| {
            let state = Arc::clone(&self.state);
            let resources = Arc::clone(&self.resources);
            ProgressMonitor::spawn(
                self.settings.progress_interval(),
                callback,
                Box::new(move || progress_of(&state, &resources)),
            )
        });

        let stopped = self.run_control_loop(cancel);
        let summary = self.finish_run(stopped);
        if let Some(monitor) = monitor {
            monitor.finish();
        }
        self.stop_request.store(STOP_NONE, Ordering::Release);
        self.running.store(false, Ordering::Release);
        Ok(summary)
    }

    fn stop_requested(&self) -> Option<StopMode> {
        match self.stop_request.load(Ordering::Acquire) {
            STOP_WAIT => Some(StopMode::Wait),
            STOP_NO_WAIT => Some(StopMode::NoWait),
            _ => None,
        }
    }

    /// Dispatch, collect and route outcomes until quiescence or stop.
    fn run_control_loop(&self, cancel: CancelFlag) -> Option<StopMode> {
        let (completion_tx, completion_rx) = mpsc::channel();
        let context = Arc::new(WorkerContext {
            transcoder: Arc::clone(&self.transcoder),
            resources: Arc::clone(&self.resources),
            cancel,
            timeout: self.settings.task_timeout(),
            min_output_bytes: self.settings.min_output_bytes,
        });
        let pool = WorkerPool::spawn(self.max_workers, context, completion_tx);
        let poll_interval = self.settings.poll_interval();
        let mut in_flight = 0usize;
        let mut since_checkpoint = 0u32;

        let stopped = loop {
            let stop = self.stop_requested();
            if stop == Some(StopMode::NoWait) {
                break stop;
            }
            if stop.is_none() && !self.fill_slots(&pool, &mut in_flight) {
                error!("All workers are gone; abandoning the run");
                break stop;
            }
            if in_flight == 0 && (stop.is_some() || self.lock_state().queue.is_empty()) {
                break stop;
            }
            match completion_rx.recv_timeout(poll_interval) {
                // Outcomes that race a no-wait stop stay unrecorded.
                Ok(_) if self.stop_requested() == Some(StopMode::NoWait) => {
                    break Some(StopMode::NoWait);
                }
                Ok(completion) => {
                    in_flight -= 1;
                    since_checkpoint += self.apply_completion(completion);
                    since_checkpoint += self.drain_ready(&completion_rx, &mut in_flight);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    error!("Completion channel closed with {in_flight} task(s) in flight");
                    break stop;
                }
            }
            let every = self.settings.checkpoint_every;
            if every > 0 && since_checkpoint >= every {
                self.checkpoint_quietly();
                since_checkpoint = 0;
            }
        };
        pool.shutdown(stopped != Some(StopMode::NoWait));
        stopped
    }

    /// Dispatch while below the worker limit. False when no worker accepts work.
    fn fill_slots(&self, pool: &WorkerPool, in_flight: &mut usize) -> bool {
        while *in_flight < self.max_workers {
            let Some(task) = self.lock_state().take_for_dispatch() else {
                return true;
            };
            if let Err(task) = pool.dispatch(task) {
                let mut state = self.lock_state();
                state.release(&task);
                state.requeue(task);
                return false;
            }
            *in_flight += 1;
        }
        true
    }

    fn drain_ready(&self, completions: &Receiver<Completion>, in_flight: &mut usize) -> u32 {
        let mut terminal = 0;
        while self.stop_requested() != Some(StopMode::NoWait)
            && let Ok(completion) = completions.try_recv()
        {
            *in_flight -= 1;
            terminal += self.apply_completion(completion);
        }
        terminal
    }

    /// Route one outcome through the retry policy; returns 1 when it was terminal.
    fn apply_completion(&self, completion: Completion) -> u32 {
        let Completion {
            task,
            worker_id,
            elapsed,
            outcome,
        } = completion;
        let seconds = elapsed.as_secs_f64();
        let mut state = lock_state(&self.state);
        match outcome {
            Ok(output_bytes) => {
                self.retry.on_success(&mut state, task, worker_id, seconds, output_bytes);
                1
            }
            Err(failure) => {
                let decision =
                    self.retry
                        .on_failure(&mut state, task, worker_id, seconds, failure.to_string());
                u32::from(decision == RetryDecision::Failed)
            }
        }
    }

    /// Stamp the end time, write the final checkpoint and log the summary.
    fn finish_run(&self, stopped: Option<StopMode>) -> RunSummary {
        {
            let mut state = self.lock_state();
            state.stats.ended_at = Some(OffsetDateTime::now_utc());
        }
        self.checkpoint_quietly();
        let summary = self.statistics();
        log_summary(&summary, stopped);
        summary
    }
}

fn log_summary(summary: &RunSummary, stopped: Option<StopMode>) {
    let stats = &summary.stats;
    match stopped {
        Some(mode) => warn!("Batch stopped early ({mode:?})"),
        None => info!("Batch finished"),
    }
    info!(
        "Total {} | completed {} | failed {} | still queued {} | in flight {}",
        stats.total, stats.completed, stats.failed, stats.queued, stats.processing
    );
    if let Some(duration) = summary.total_duration_seconds {
        info!("Elapsed {:.1}s", duration);
    }
    if let Some(avg) = summary.avg_seconds_per_task {
        info!("Average {:.1}s per task", avg);
    }
    if let Some(throughput) = summary.throughput_mb_per_second {
        info!("Throughput {:.2} MB/s", throughput);
    }
}
