//! Best-effort JSON snapshots of run state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use super::stats::{RunStatistics, TaskResult};
use super::task::TaskDescriptor;
use crate::app_dirs;
use crate::config::atomic_write;

/// File name used when no explicit checkpoint path is configured.
pub const DEFAULT_CHECKPOINT_FILE: &str = "batch_checkpoint.json";

/// Point-in-time copy of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub stats: RunStatistics,
    pub completed_tasks: Vec<TaskResult>,
    pub failed_tasks: Vec<TaskResult>,
    /// In-flight then queued tasks at snapshot time.
    #[serde(default)]
    pub pending_tasks: Vec<TaskDescriptor>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// What restoring a checkpoint brings back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Counters and result lists only.
    #[default]
    ReportOnly,
    /// Also requeue the tasks that were pending or in flight.
    RequeuePending,
}

/// Errors raised while reading or writing checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid checkpoint at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(serde_json::Error),
    #[error("No checkpoint location available: {0}")]
    Location(#[from] app_dirs::AppDirError),
}

/// Reads and writes the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the application checkpoints directory.
    pub fn in_app_dir() -> Result<Self, CheckpointError> {
        Ok(Self::new(app_dirs::checkpoints_dir()?.join(DEFAULT_CHECKPOINT_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &CheckpointSnapshot) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(snapshot).map_err(CheckpointError::Serialize)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| CheckpointError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        atomic_write(&self.path, &json).map_err(|source| CheckpointError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Load the checkpoint, or `None` when no file exists yet.
    pub fn load(&self) -> Result<Option<CheckpointSnapshot>, CheckpointError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CheckpointError::Parse {
                path: self.path.clone(),
                source,
            })
    }
}
