//! Queue, counters and result lists guarded by the orchestrator's single lock.

use std::collections::BTreeMap;

use time::OffsetDateTime;

use super::checkpoint::CheckpointSnapshot;
use super::queue::{QueueOrder, TaskQueue};
use super::stats::{RunStatistics, TaskResult};
use super::task::{TaskDescriptor, TaskId};

/// Everything guarded by the orchestrator's single lock.
#[derive(Debug)]
pub(crate) struct RunState {
    pub(crate) queue: TaskQueue,
    pub(crate) stats: RunStatistics,
    pub(crate) completed: Vec<TaskResult>,
    pub(crate) failed: Vec<TaskResult>,
    /// Copies of dispatched tasks, kept for checkpoints only.
    pub(crate) in_flight: BTreeMap<TaskId, TaskDescriptor>,
}

impl RunState {
    pub(crate) fn new(order: QueueOrder) -> Self {
        Self {
            queue: TaskQueue::new(order),
            stats: RunStatistics::default(),
            completed: Vec::new(),
            failed: Vec::new(),
            in_flight: BTreeMap::new(),
        }
    }

    /// Admit a brand new task into the run.
    pub(crate) fn enqueue_new(&mut self, task: TaskDescriptor) {
        self.stats.total += 1;
        self.stats.queued += 1;
        self.stats.total_bytes += task.file_size_bytes;
        self.queue.enqueue(task);
    }

    /// Put a task that was already counted back into the queue.
    pub(crate) fn requeue(&mut self, task: TaskDescriptor) {
        self.stats.queued += 1;
        self.queue.enqueue(task);
    }

    /// Pop the next task and account for it as processing.
    pub(crate) fn take_for_dispatch(&mut self) -> Option<TaskDescriptor> {
        let task = self.queue.try_dequeue()?;
        self.stats.queued = self.stats.queued.saturating_sub(1);
        self.stats.processing += 1;
        self.in_flight.insert(task.id, task.clone());
        Some(task)
    }

    /// Drop the processing claim held by a task that just returned from a worker.
    pub(crate) fn release(&mut self, task: &TaskDescriptor) {
        self.stats.processing = self.stats.processing.saturating_sub(1);
        self.in_flight.remove(&task.id);
    }

    pub(crate) fn snapshot(&self) -> CheckpointSnapshot {
        let mut pending_tasks: Vec<TaskDescriptor> = self.in_flight.values().cloned().collect();
        pending_tasks.extend(self.queue.pending());
        CheckpointSnapshot {
            stats: self.stats.clone(),
            completed_tasks: self.completed.clone(),
            failed_tasks: self.failed.clone(),
            pending_tasks,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
