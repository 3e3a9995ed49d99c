use std::path::PathBuf;

pub(super) const MAX_WORKER_COUNT: u32 = 64;
pub(super) const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Extensions picked up by folder ingestion when the caller supplies none.
pub const DEFAULT_VIDEO_EXTENSIONS: [&str; 7] =
    [".mp4", ".avi", ".mov", ".mkv", ".wmv", ".flv", ".webm"];

pub(super) fn clamp_worker_count(value: u32) -> u32 {
    value.min(MAX_WORKER_COUNT)
}

pub(super) fn default_max_workers() -> u32 {
    0
}

pub(super) fn default_memory_limit_gb() -> f64 {
    8.0
}

pub(super) fn default_max_retries() -> u32 {
    3
}

pub(super) fn default_retry_demotion() -> i64 {
    10
}

pub(super) fn default_checkpoint_every() -> u32 {
    10
}

pub(super) fn default_progress_interval_ms() -> u64 {
    2_000
}

pub(super) fn default_poll_interval_ms() -> u64 {
    100
}

pub(super) fn default_task_timeout_secs() -> u64 {
    0
}

pub(super) fn default_cpu_limit_percent() -> f32 {
    90.0
}

pub(super) fn default_min_disk_free_gb() -> f64 {
    1.0
}

pub(super) fn default_cpu_sample_ms() -> u64 {
    1_000
}

pub(super) fn default_min_output_bytes() -> u64 {
    1_024
}

pub(super) fn default_video_extensions() -> Vec<String> {
    DEFAULT_VIDEO_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

pub(super) fn default_checkpoint_path() -> Option<PathBuf> {
    None
}
