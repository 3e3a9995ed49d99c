//! Run counters, terminal results and progress/ETA arithmetic.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::resources::ResourceSample;
use super::task::{TaskDescriptor, TaskId};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Aggregate counters for one orchestrator's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub processing: u64,
    pub queued: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
}

impl RunStatistics {
    /// Tasks that have not reached a terminal outcome.
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.completed + self.failed)
    }

    /// True when nothing is queued or in flight.
    pub fn is_quiescent(&self) -> bool {
        self.queued == 0 && self.processing == 0
    }
}

/// Terminal outcome of a task; exactly one per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    /// Duration of the final attempt.
    pub duration_seconds: f64,
    pub error: Option<String>,
    pub retry_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    pub worker_id: usize,
    pub input_bytes: u64,
    #[serde(default)]
    pub output_bytes: Option<u64>,
}

impl TaskResult {
    pub fn success(task: &TaskDescriptor, worker_id: usize, duration_seconds: f64, output_bytes: u64) -> Self {
        Self {
            task_id: task.id,
            input_path: task.input_path.clone(),
            output_path: Some(task.output_path.clone()),
            duration_seconds,
            error: None,
            retry_count: task.retry_count,
            completed_at: OffsetDateTime::now_utc(),
            worker_id,
            input_bytes: task.file_size_bytes,
            output_bytes: Some(output_bytes),
        }
    }

    pub fn failure(task: &TaskDescriptor, worker_id: usize, duration_seconds: f64, error: String) -> Self {
        Self {
            task_id: task.id,
            input_path: task.input_path.clone(),
            output_path: None,
            duration_seconds,
            error: Some(error),
            retry_count: task.retry_count,
            completed_at: OffsetDateTime::now_utc(),
            worker_id,
            input_bytes: task.file_size_bytes,
            output_bytes: None,
        }
    }
}

/// Progress view handed to callers and callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub processing: u64,
    pub queued: u64,
    pub remaining: u64,
    pub percentage: f64,
    pub size_percentage: f64,
    pub estimated_remaining_seconds: f64,
    pub resources: Option<ResourceSample>,
}

impl ProgressSnapshot {
    /// Derive progress from counters as of `now`.
    pub fn compute(stats: &RunStatistics, now: OffsetDateTime, resources: Option<ResourceSample>) -> Self {
        let finished = stats.completed + stats.failed;
        let remaining = stats.remaining();
        let percentage = ratio_percent(finished as f64, stats.total as f64);
        let size_percentage = ratio_percent(stats.processed_bytes as f64, stats.total_bytes as f64);
        let estimated_remaining_seconds = match stats.started_at {
            Some(started) if stats.completed > 0 => {
                let elapsed = (now - started).as_seconds_f64().max(0.0);
                elapsed / stats.completed as f64 * remaining as f64
            }
            _ => 0.0,
        };
        Self {
            total: stats.total,
            completed: stats.completed,
            failed: stats.failed,
            processing: stats.processing,
            queued: stats.queued,
            remaining,
            percentage,
            size_percentage,
            estimated_remaining_seconds,
            resources,
        }
    }
}

fn ratio_percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole * 100.0).min(100.0)
    } else {
        0.0
    }
}

/// Counters plus durations derived once a run has ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(flatten)]
    pub stats: RunStatistics,
    pub total_duration_seconds: Option<f64>,
    pub avg_seconds_per_task: Option<f64>,
    pub throughput_mb_per_second: Option<f64>,
}

impl RunSummary {
    pub fn from_stats(stats: RunStatistics) -> Self {
        let total_duration_seconds = match (stats.started_at, stats.ended_at) {
            (Some(start), Some(end)) => Some((end - start).as_seconds_f64().max(0.0)),
            _ => None,
        };
        let avg_seconds_per_task = total_duration_seconds
            .filter(|_| stats.total > 0)
            .map(|duration| duration / stats.total as f64);
        let throughput_mb_per_second = total_duration_seconds
            .filter(|duration| *duration > 0.0)
            .map(|duration| stats.total_bytes as f64 / BYTES_PER_MB / duration);
        Self {
            stats,
            total_duration_seconds,
            avg_seconds_per_task,
            throughput_mb_per_second,
        }
    }
}
