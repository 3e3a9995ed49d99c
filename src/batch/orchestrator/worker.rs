//! Worker threads: admission check, transcode call, output verification.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::batch::error::TaskFailure;
use crate::batch::resources::ResourceMonitor;
use crate::batch::task::TaskDescriptor;
use crate::batch::transcode::{CancelFlag, TranscodeError, TranscodeJob, Transcoder};

/// Everything a worker needs for one run.
pub(crate) struct WorkerContext {
    pub(crate) transcoder: Arc<dyn Transcoder>,
    pub(crate) resources: Arc<ResourceMonitor>,
    pub(crate) cancel: CancelFlag,
    pub(crate) timeout: Option<Duration>,
    pub(crate) min_output_bytes: u64,
}

/// Outcome of one attempt, sent back to the control loop.
pub(crate) struct Completion {
    pub(crate) task: TaskDescriptor,
    pub(crate) worker_id: usize,
    pub(crate) elapsed: Duration,
    /// Output size on success.
    pub(crate) outcome: Result<u64, TaskFailure>,
}

/// Fixed set of worker threads fed through a shared dispatch channel.
pub(crate) struct WorkerPool {
    dispatch: Option<Sender<TaskDescriptor>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        count: usize,
        context: Arc<WorkerContext>,
        completions: Sender<Completion>,
    ) -> Self {
        let (dispatch, jobs) = mpsc::channel::<TaskDescriptor>();
        let jobs = Arc::new(Mutex::new(jobs));
        let threads = (0..count.max(1))
            .map(|worker_id| {
                let jobs = Arc::clone(&jobs);
                let context = Arc::clone(&context);
                let completions = completions.clone();
                std::thread::Builder::new()
                    .name(format!("vidbatch-worker-{worker_id}"))
                    .spawn(move || worker_loop(worker_id, &jobs, &context, &completions))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!("Failed to spawn worker thread: {err}");
                    None
                }
            })
            .collect();
        Self {
            dispatch: Some(dispatch),
            threads,
        }
    }

    /// Hand a task to the next idle worker; gives the task back if every worker is gone.
    pub(crate) fn dispatch(&self, task: TaskDescriptor) -> Result<(), TaskDescriptor> {
        match &self.dispatch {
            Some(sender) => sender.send(task).map_err(|mpsc::SendError(task)| task),
            None => Err(task),
        }
    }

    /// Close the dispatch channel. With `wait` the worker threads are joined,
    /// otherwise they are detached and exit after their current attempt.
    pub(crate) fn shutdown(mut self, wait: bool) {
        self.dispatch.take();
        if wait {
            for handle in self.threads.drain(..) {
                if handle.join().is_err() {
                    warn!("Worker thread panicked outside a task");
                }
            }
        } else {
            self.threads.clear();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    jobs: &Mutex<Receiver<TaskDescriptor>>,
    context: &WorkerContext,
    completions: &Sender<Completion>,
) {
    loop {
        let next = {
            let receiver = jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            receiver.recv()
        };
        let Ok(task) = next else {
            debug!("Worker {worker_id} exiting");
            return;
        };
        let started = Instant::now();
        let outcome = run_attempt(context, &task);
        let completion = Completion {
            task,
            worker_id,
            elapsed: started.elapsed(),
            outcome,
        };
        if completions.send(completion).is_err() {
            debug!("Worker {worker_id} finished after the run ended; outcome dropped");
        }
    }
}

/// One attempt of one task.
pub(crate) fn run_attempt(context: &WorkerContext, task: &TaskDescriptor) -> Result<u64, TaskFailure> {
    let sample = context.resources.sample();
    if !context.resources.admits(&sample) {
        return Err(TaskFailure::InsufficientResources(sample));
    }
    let started = Instant::now();
    let job = TranscodeJob {
        input: task.input_path.clone(),
        output: task.output_path.clone(),
        config: task.config.clone(),
        deadline: context.timeout.map(|timeout| started + timeout),
        cancel: context.cancel.clone(),
    };
    let timed_out = || TaskFailure::TimedOut(context.timeout.unwrap_or_else(|| started.elapsed()));
    let result = catch_unwind(AssertUnwindSafe(|| context.transcoder.transcode(&job)))
        .map_err(|payload| TaskFailure::Panicked(panic_to_string(payload)))?;
    match result {
        Ok(()) => {}
        Err(TranscodeError::TimedOut) => return Err(timed_out()),
        Err(TranscodeError::Cancelled) => return Err(TaskFailure::Cancelled),
        Err(err) => return Err(TaskFailure::Transcode(err)),
    }
    if job.deadline_passed() {
        return Err(timed_out());
    }
    verify_output(&job.output, context.min_output_bytes)
}

fn verify_output(path: &Path, min_bytes: u64) -> Result<u64, TaskFailure> {
    let bytes = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Err(TaskFailure::OutputMissing(path.to_path_buf())),
    };
    if bytes < min_bytes {
        return Err(TaskFailure::OutputTooSmall {
            path: path.to_path_buf(),
            bytes,
        });
    }
    Ok(bytes)
}

fn panic_to_string(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown panic payload".to_string()
    }
}
