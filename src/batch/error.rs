//! Engine errors and per-attempt failure reasons.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::checkpoint::CheckpointError;
use super::report::ReportError;
use super::resources::ResourceSample;
use super::transcode::TranscodeError;

/// API-level errors returned synchronously to the caller.
#[derive(Debug, Error)]
pub enum BatchError {
    /// `start` was called while a run is active.
    #[error("Batch processing is already running")]
    AlreadyRunning,
    /// `start` was called with nothing queued.
    #[error("No tasks are queued")]
    EmptyQueue,
    /// The folder handed to ingestion does not exist.
    #[error("Input directory does not exist: {path}")]
    InputDirMissing { path: PathBuf },
    /// A single input file handed to `add_task` does not exist.
    #[error("Input file does not exist: {path}")]
    InputMissing { path: PathBuf },
    /// The input directory could not be listed.
    #[error("Failed to read input directory {path}: {source}")]
    ReadInputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The output directory could not be created.
    #[error("Failed to create output directory {path}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Why a single attempt failed. Rendered into the task's result on final failure.
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error(
        "insufficient resources: RAM {:.1}GB, CPU {:.1}%, disk free {:.1}GB",
        .0.memory_used_gb,
        .0.cpu_percent,
        .0.disk_free_gb
    )]
    InsufficientResources(ResourceSample),
    #[error("transcode failed: {0}")]
    Transcode(#[source] TranscodeError),
    #[error("transcode timed out after {0:?}")]
    TimedOut(Duration),
    #[error("transcode cancelled")]
    Cancelled,
    #[error("output was not created: {0}")]
    OutputMissing(PathBuf),
    #[error("output is suspiciously small ({bytes} bytes): {path}")]
    OutputTooSmall { path: PathBuf, bytes: u64 },
    #[error("transcoder panicked: {0}")]
    Panicked(String),
}
