//! On-demand JSON report of a run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use super::queue::QueueOrder;
use super::resources::ResourceSample;
use super::stats::{ProgressSnapshot, RunSummary, TaskResult};
use crate::config::atomic_write;

/// Errors raised while exporting a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to serialize report: {0}")]
    Serialize(serde_json::Error),
    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Engine settings echoed into the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub max_workers: usize,
    pub memory_limit_gb: f64,
    /// True when tasks are dispatched by priority rather than FIFO.
    pub priority_mode: bool,
}

impl ProcessorConfig {
    pub fn new(max_workers: usize, memory_limit_gb: f64, order: QueueOrder) -> Self {
        Self {
            max_workers,
            memory_limit_gb,
            priority_mode: order == QueueOrder::Priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub summary: RunSummary,
    pub progress: ProgressSnapshot,
    pub completed_tasks: Vec<TaskResult>,
    pub failed_tasks: Vec<TaskResult>,
    pub system_info: ResourceSample,
    #[serde(with = "time::serde::rfc3339")]
    pub export_time: OffsetDateTime,
    pub processor_config: ProcessorConfig,
}

impl ReportDocument {
    /// Write the report as pretty JSON, creating the parent directory if needed.
    pub fn write_to(&self, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_vec_pretty(self).map_err(ReportError::Serialize)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| ReportError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        atomic_write(path, &json).map_err(|source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
