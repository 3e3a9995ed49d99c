//! Batch transcoding engine: queueing, admission control, retries, progress and checkpoints.

pub mod checkpoint;
pub mod error;
pub mod ingest;
pub mod orchestrator;
pub mod queue;
pub mod report;
pub mod resources;
pub mod retry;
mod state;
pub mod stats;
pub mod task;
pub mod transcode;

pub use checkpoint::{CheckpointSnapshot, CheckpointStore, ResumePolicy};
pub use error::{BatchError, TaskFailure};
pub use orchestrator::{Orchestrator, ProgressCallback, StopMode};
pub use queue::{QueueOrder, TaskQueue};
pub use resources::{AdmissionLimits, FixedProbe, ResourceMonitor, ResourceProbe, ResourceSample, SystemProbe};
pub use retry::{RetryCoordinator, RetryDecision};
pub use stats::{ProgressSnapshot, RunStatistics, RunSummary, TaskResult};
pub use task::{TaskConfig, TaskDescriptor, TaskId};
pub use transcode::{CancelFlag, CommandTranscoder, TranscodeError, TranscodeJob, Transcoder};
