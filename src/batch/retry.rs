//! Routing of attempt outcomes: requeue with demotion, or record as terminal.

use tracing::{info, warn};

use super::state::RunState;
use super::stats::TaskResult;
use super::task::TaskDescriptor;

/// Priority penalty applied on each requeue unless configured otherwise.
pub const DEFAULT_RETRY_DEMOTION: i64 = 10;

/// What happened to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back in the queue for another attempt.
    Requeued { attempt: u32, priority: i64 },
    /// Retries exhausted; recorded in the failed list.
    Failed,
}

/// Applies the retry policy to finished attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryCoordinator {
    demotion: i64,
}

impl Default for RetryCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DEMOTION)
    }
}

impl RetryCoordinator {
    pub fn new(demotion: i64) -> Self {
        Self {
            demotion: demotion.max(0),
        }
    }

    pub fn demotion(&self) -> i64 {
        self.demotion
    }

    /// Route a failed attempt. Must be called with the run-state lock held.
    pub(crate) fn on_failure(
        &self,
        state: &mut RunState,
        mut task: TaskDescriptor,
        worker_id: usize,
        duration_seconds: f64,
        error: String,
    ) -> RetryDecision {
        state.release(&task);
        if task.can_retry() {
            task.retry_count += 1;
            task.priority = task.priority.saturating_add(self.demotion);
            let decision = RetryDecision::Requeued {
                attempt: task.retry_count,
                priority: task.priority,
            };
            warn!(
                "[{}] Retry {}/{} for {}: {}",
                task.id.short(),
                task.retry_count,
                task.max_retries,
                task.display_name(),
                error
            );
            state.requeue(task);
            return decision;
        }
        warn!(
            "[{}] Failed {} after {} retries: {}",
            task.id.short(),
            task.display_name(),
            task.retry_count,
            error
        );
        state.stats.failed += 1;
        state
            .failed
            .push(TaskResult::failure(&task, worker_id, duration_seconds, error));
        RetryDecision::Failed
    }

    /// Record a successful attempt. Must be called with the run-state lock held.
    pub(crate) fn on_success(
        &self,
        state: &mut RunState,
        task: TaskDescriptor,
        worker_id: usize,
        duration_seconds: f64,
        output_bytes: u64,
    ) {
        state.release(&task);
        info!(
            "[{}] Completed {} ({:.1}s)",
            task.id.short(),
            task.display_name(),
            duration_seconds
        );
        state.stats.completed += 1;
        state.stats.processed_bytes += task.file_size_bytes;
        state.completed.push(TaskResult::success(
            &task,
            worker_id,
            duration_seconds,
            output_bytes,
        ));
    }
}
