//! Pending-task queue ordered by priority or by arrival.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use serde::{Deserialize, Serialize};

use super::task::TaskDescriptor;

/// How pending tasks are ordered for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrder {
    /// Ascending `(priority, file size, insertion order)`.
    #[default]
    Priority,
    /// Plain insertion order.
    Fifo,
}

/// Holding area for tasks waiting to be dispatched.
#[derive(Debug)]
pub struct TaskQueue {
    inner: QueueInner,
    next_sequence: u64,
}

#[derive(Debug)]
enum QueueInner {
    Priority(BinaryHeap<PendingTask>),
    Fifo(VecDeque<TaskDescriptor>),
}

/// Heap entry keyed on numbers only, so ties never inspect the payload.
#[derive(Debug)]
struct PendingTask {
    priority: i64,
    file_size_bytes: u64,
    sequence: u64,
    task: TaskDescriptor,
}

impl PendingTask {
    fn key(&self) -> (i64, u64, u64) {
        (self.priority, self.file_size_bytes, self.sequence)
    }
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingTask {}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTask {
    // Reversed: `BinaryHeap` is a max-heap and the smallest key must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl TaskQueue {
    pub fn new(order: QueueOrder) -> Self {
        let inner = match order {
            QueueOrder::Priority => QueueInner::Priority(BinaryHeap::new()),
            QueueOrder::Fifo => QueueInner::Fifo(VecDeque::new()),
        };
        Self {
            inner,
            next_sequence: 0,
        }
    }

    pub fn order(&self) -> QueueOrder {
        match self.inner {
            QueueInner::Priority(_) => QueueOrder::Priority,
            QueueInner::Fifo(_) => QueueOrder::Fifo,
        }
    }

    pub fn enqueue(&mut self, task: TaskDescriptor) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        match &mut self.inner {
            QueueInner::Priority(heap) => heap.push(PendingTask {
                priority: task.priority,
                file_size_bytes: task.file_size_bytes,
                sequence,
                task,
            }),
            QueueInner::Fifo(queue) => queue.push_back(task),
        }
    }

    pub fn try_dequeue(&mut self) -> Option<TaskDescriptor> {
        match &mut self.inner {
            QueueInner::Priority(heap) => heap.pop().map(|entry| entry.task),
            QueueInner::Fifo(queue) => queue.pop_front(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            QueueInner::Priority(heap) => heap.len(),
            QueueInner::Fifo(queue) => queue.len(),
        }
    }

    /// Copies of the pending tasks in dispatch order.
    pub fn pending(&self) -> Vec<TaskDescriptor> {
        match &self.inner {
            QueueInner::Priority(heap) => {
                let mut entries: Vec<&PendingTask> = heap.iter().collect();
                entries.sort_by_key(|entry| entry.key());
                entries.into_iter().map(|entry| entry.task.clone()).collect()
            }
            QueueInner::Fifo(queue) => queue.iter().cloned().collect(),
        }
    }
}
