//! The per-task transcode operation and a command-line backed implementation.
//!
//! The engine treats transcoding as a black box: it hands over the input and
//! output locations plus the task's opaque config, and only looks at whether
//! the call succeeded. [`CommandTranscoder`] runs an external program (FFmpeg
//! or a wrapper script) and enforces the attempt deadline and cancellation by
//! killing the child process.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use super::task::TaskConfig;

/// Environment variable through which [`CommandTranscoder`] exposes the task config as JSON.
pub const TASK_CONFIG_ENV: &str = "VIDBATCH_TASK_CONFIG";

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL_BYTES: usize = 2_048;
/// How long a finished child's stderr may take to reach EOF.
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Shared flag raised when in-flight work should be abandoned.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a transcoder receives for one attempt.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: TaskConfig,
    /// Attempt deadline; implementations should give up once it passes.
    pub deadline: Option<Instant>,
    pub cancel: CancelFlag,
}

impl TranscodeJob {
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Errors reported by a transcoder.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Generic failure with a message.
    #[error("{0}")]
    Failed(String),
    /// The external program could not be started.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// The external program exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    /// The attempt ran past its deadline.
    #[error("transcode exceeded its deadline")]
    TimedOut,
    /// The attempt was abandoned because the run is stopping.
    #[error("transcode cancelled")]
    Cancelled,
}

/// The external per-task work function.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, job: &TranscodeJob) -> Result<(), TranscodeError>;
}

impl<F> Transcoder for F
where
    F: Fn(&TranscodeJob) -> Result<(), TranscodeError> + Send + Sync,
{
    fn transcode(&self, job: &TranscodeJob) -> Result<(), TranscodeError> {
        self(job)
    }
}

/// Runs an external program once per task.
///
/// `{input}` and `{output}` in the argument template are replaced with the
/// task's paths; the config map is exported as JSON in [`TASK_CONFIG_ENV`].
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    program: String,
    args: Vec<String>,
}

impl CommandTranscoder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace separated command line such as `ffmpeg -y -i {input} {output}`.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn expand_args(&self, job: &TranscodeJob) -> Vec<String> {
        let input = job.input.to_string_lossy();
        let output = job.output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }

    fn wait_for_child(&self, child: &mut Child, job: &TranscodeJob) -> Result<ExitStatus, TranscodeError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(err) => {
                    return Err(TranscodeError::Failed(format!(
                        "Failed to poll {}: {err}",
                        self.program
                    )));
                }
            }
            if job.cancel.is_cancelled() {
                kill_child(child, &self.program);
                return Err(TranscodeError::Cancelled);
            }
            if job.deadline_passed() {
                kill_child(child, &self.program);
                return Err(TranscodeError::TimedOut);
            }
            std::thread::sleep(CHILD_POLL_INTERVAL);
        }
    }
}

impl Transcoder for CommandTranscoder {
    fn transcode(&self, job: &TranscodeJob) -> Result<(), TranscodeError> {
        let config_json = serde_json::to_string(&job.config)
            .map_err(|err| TranscodeError::Failed(format!("Serialize task config failed: {err}")))?;
        let args = self.expand_args(job);
        debug!("Running {} {:?}", self.program, args);
        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .env(TASK_CONFIG_ENV, config_json)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(|source| TranscodeError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let stderr_tail = child.stderr.take().map(spawn_stderr_tail);
        // Killed children may leave descendants holding stderr; never wait on it then.
        let status = self.wait_for_child(&mut child, job)?;
        let stderr = stderr_tail
            .and_then(|tail| tail.recv_timeout(STDERR_GRACE).ok())
            .unwrap_or_default();
        if status.success() {
            return Ok(());
        }
        Err(TranscodeError::ExitStatus {
            program: self.program.clone(),
            status,
            stderr,
        })
    }
}

/// Kill the child together with everything it spawned.
fn kill_child(child: &mut Child, program: &str) {
    if !kill_process_group(child)
        && let Err(err) = child.kill()
    {
        warn!("Failed to kill {program}: {err}");
    }
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_process_group(child: &Child) -> bool {
    let Ok(pid) = i32::try_from(child.id()) else {
        return false;
    };
    // SAFETY: the child leads its own process group (see `process_group(0)` at spawn),
    // so the negated pid only addresses processes started for this attempt.
    unsafe { libc::kill(-pid, libc::SIGKILL) == 0 }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) -> bool {
    false
}

/// Drain stderr on a helper thread so a chatty child never blocks on a full pipe.
fn spawn_stderr_tail(mut stderr: std::process::ChildStderr) -> Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    std::thread::spawn(move || {
        let mut tail: Vec<u8> = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    tail.extend_from_slice(&buf[..read]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
            }
        }
        let _ = sender.send(String::from_utf8_lossy(&tail).trim().to_string());
    });
    receiver
}
