use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::queue::QueueOrder;

use super::defaults::{
    MIN_POLL_INTERVAL_MS, clamp_worker_count, default_checkpoint_every, default_checkpoint_path,
    default_cpu_limit_percent, default_cpu_sample_ms, default_max_retries, default_max_workers,
    default_memory_limit_gb, default_min_disk_free_gb, default_min_output_bytes,
    default_poll_interval_ms, default_progress_interval_ms, default_retry_demotion,
    default_task_timeout_secs, default_video_extensions,
};

/// Environment variable that overrides the worker count when settings leave it on auto.
pub const WORKERS_ENV: &str = "VIDBATCH_WORKERS";

/// Engine settings, fixed for the lifetime of an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Worker thread count (0 = auto, 70% of the CPU count clamped to 2..=16).
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
    /// Used memory ceiling in GiB above which new attempts are refused.
    #[serde(default = "default_memory_limit_gb")]
    pub memory_limit_gb: f64,
    /// Dispatch order of pending tasks.
    #[serde(default)]
    pub queue_order: QueueOrder,
    /// Retries granted to each task after its first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Priority penalty added to a task each time it is requeued.
    #[serde(default = "default_retry_demotion")]
    pub retry_demotion: i64,
    /// Write a checkpoint after this many terminal outcomes (0 = only at run end).
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: u32,
    /// Checkpoint file location; defaults to the application checkpoints directory.
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: Option<PathBuf>,
    /// Interval between progress callback invocations.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Longest idle wait of the control loop between completions.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-attempt deadline in seconds (0 = no deadline).
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// CPU usage at or above which new attempts are refused.
    #[serde(default = "default_cpu_limit_percent")]
    pub cpu_limit_percent: f32,
    /// Free disk space in GiB at or below which new attempts are refused.
    #[serde(default = "default_min_disk_free_gb")]
    pub min_disk_free_gb: f64,
    /// Window over which CPU usage is measured for each sample.
    #[serde(default = "default_cpu_sample_ms")]
    pub cpu_sample_ms: u64,
    /// Path whose disk is checked for free space (defaults to the working directory).
    #[serde(default)]
    pub disk_probe_path: Option<PathBuf>,
    /// Outputs smaller than this are treated as failed transcodes.
    #[serde(default = "default_min_output_bytes")]
    pub min_output_bytes: u64,
    /// Extensions accepted by folder ingestion.
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            memory_limit_gb: default_memory_limit_gb(),
            queue_order: QueueOrder::default(),
            max_retries: default_max_retries(),
            retry_demotion: default_retry_demotion(),
            checkpoint_every: default_checkpoint_every(),
            checkpoint_path: default_checkpoint_path(),
            progress_interval_ms: default_progress_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            cpu_limit_percent: default_cpu_limit_percent(),
            min_disk_free_gb: default_min_disk_free_gb(),
            cpu_sample_ms: default_cpu_sample_ms(),
            disk_probe_path: None,
            min_output_bytes: default_min_output_bytes(),
            video_extensions: default_video_extensions(),
        }
    }
}

impl BatchSettings {
    /// Clamp values into their supported ranges.
    pub fn normalized(mut self) -> Self {
        self.max_workers = clamp_worker_count(self.max_workers);
        if !self.memory_limit_gb.is_finite() || self.memory_limit_gb <= 0.0 {
            self.memory_limit_gb = default_memory_limit_gb();
        }
        if !self.cpu_limit_percent.is_finite() {
            self.cpu_limit_percent = default_cpu_limit_percent();
        }
        self.cpu_limit_percent = self.cpu_limit_percent.clamp(1.0, 100.0);
        if !self.min_disk_free_gb.is_finite() || self.min_disk_free_gb < 0.0 {
            self.min_disk_free_gb = default_min_disk_free_gb();
        }
        self.retry_demotion = self.retry_demotion.max(0);
        self.poll_interval_ms = self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS);
        self.progress_interval_ms = self.progress_interval_ms.max(MIN_POLL_INTERVAL_MS);
        if self.video_extensions.is_empty() {
            self.video_extensions = default_video_extensions();
        }
        self
    }

    /// Worker count after applying the auto rule and the environment override.
    pub fn resolved_max_workers(&self) -> usize {
        if self.max_workers >= 1 {
            return self.max_workers as usize;
        }
        if let Ok(value) = std::env::var(WORKERS_ENV)
            && let Ok(parsed) = value.trim().parse::<usize>()
            && parsed >= 1
        {
            return parsed;
        }
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        auto_worker_count(cpu_count)
    }

    /// Per-attempt deadline, if any.
    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_secs > 0).then(|| Duration::from_secs(self.task_timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_ms)
    }
}

/// 70% of the available cores, never fewer than 2 nor more than 16.
pub(crate) fn auto_worker_count(cpu_count: usize) -> usize {
    (cpu_count * 7 / 10).clamp(2, 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_worker_count_is_clamped() {
        assert_eq!(auto_worker_count(1), 2);
        assert_eq!(auto_worker_count(4), 2);
        assert_eq!(auto_worker_count(8), 5);
        assert_eq!(auto_worker_count(12), 8);
        assert_eq!(auto_worker_count(64), 16);
    }

    #[test]
    fn explicit_worker_count_wins() {
        let settings = BatchSettings {
            max_workers: 3,
            ..BatchSettings::default()
        };
        assert_eq!(settings.resolved_max_workers(), 3);
    }

    #[test]
    fn normalized_repairs_out_of_range_values() {
        let settings = BatchSettings {
            max_workers: 500,
            memory_limit_gb: -1.0,
            cpu_limit_percent: 400.0,
            poll_interval_ms: 0,
            retry_demotion: -5,
            video_extensions: Vec::new(),
            ..BatchSettings::default()
        }
        .normalized();
        assert_eq!(settings.max_workers, 64);
        assert_eq!(settings.memory_limit_gb, 8.0);
        assert_eq!(settings.cpu_limit_percent, 100.0);
        assert_eq!(settings.poll_interval_ms, 10);
        assert_eq!(settings.retry_demotion, 0);
        assert_eq!(settings.video_extensions.len(), 7);
    }

    #[test]
    fn timeout_zero_means_none() {
        let mut settings = BatchSettings::default();
        assert_eq!(settings.task_timeout(), None);
        settings.task_timeout_secs = 30;
        assert_eq!(settings.task_timeout(), Some(Duration::from_secs(30)));
    }
}
