//! Task descriptors: one input file to turn into one output file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque per-task settings forwarded verbatim to the transcoder.
pub type TaskConfig = BTreeMap<String, serde_json::Value>;

/// Retries granted to a task after its first attempt unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Throughput assumed when estimating how long a file will take.
const ASSUMED_BYTES_PER_SECOND: f64 = 50.0 * 1024.0 * 1024.0;

/// Unique identifier for a task, fresh for every created descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form used in log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One unit of batch work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub config: TaskConfig,
    /// Lower runs first; raised each time the task is requeued after a failure.
    pub priority: i64,
    pub file_size_bytes: u64,
    pub estimated_duration_seconds: f64,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TaskDescriptor {
    /// Build a descriptor, reading the input size from disk when it exists.
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        config: TaskConfig,
        priority: i64,
    ) -> Self {
        let input_path = input_path.into();
        let file_size_bytes = file_size(&input_path).unwrap_or(0);
        Self {
            id: TaskId::new(),
            input_path,
            output_path: output_path.into(),
            config,
            priority,
            file_size_bytes,
            estimated_duration_seconds: estimate_duration_seconds(file_size_bytes),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retry_count = self.retry_count.min(max_retries);
        self
    }

    /// Override the recorded size, keeping the duration estimate in step.
    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size_bytes = bytes;
        self.estimated_duration_seconds = estimate_duration_seconds(bytes);
        self
    }

    /// True while another attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// File name of the input, for log lines.
    pub fn display_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_path.display().to_string())
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

fn estimate_duration_seconds(bytes: u64) -> f64 {
    bytes as f64 / ASSUMED_BYTES_PER_SECOND
}
