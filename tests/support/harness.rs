use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use vidbatch::batch::{
    CheckpointStore, FixedProbe, Orchestrator, ResourceProbe, TranscodeError, TranscodeJob,
    Transcoder,
};
use vidbatch::config::BatchSettings;

/// What the scripted transcoder does for each call.
#[derive(Clone, Copy, Debug)]
pub enum Behaviour {
    /// Write an output of the given size.
    Write(usize),
    /// Always return an error.
    Fail,
    /// Block until the attempt is cancelled.
    BlockUntilCancelled,
    /// Write a valid output for the first `n` calls, then block until cancelled.
    BlockAfter(usize),
}

/// Transcoder that records calls and tracks how many run at once.
pub struct ScriptedTranscoder {
    behaviour: Behaviour,
    delay: Duration,
    fail_when_name_contains: Option<String>,
    calls: Mutex<Vec<PathBuf>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTranscoder {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Self::build(behaviour, Duration::ZERO, None)
    }

    pub fn with_delay(behaviour: Behaviour, delay: Duration) -> Arc<Self> {
        Self::build(behaviour, delay, None)
    }

    /// Succeeds except for inputs whose name contains `marker`.
    pub fn failing_on(marker: &str, delay: Duration) -> Arc<Self> {
        Self::build(Behaviour::Write(4096), delay, Some(marker.to_string()))
    }

    fn build(behaviour: Behaviour, delay: Duration, marker: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            delay,
            fail_when_name_contains: marker,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Inputs in call order.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }

    /// File names of the inputs in call order.
    pub fn call_names(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn behaviour_for(&self, job: &TranscodeJob) -> Behaviour {
        let name = job.input.to_string_lossy();
        match &self.fail_when_name_contains {
            Some(marker) if name.contains(marker.as_str()) => Behaviour::Fail,
            _ => self.behaviour,
        }
    }

    fn perform(&self, job: &TranscodeJob, call_index: usize) -> Result<(), TranscodeError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.behaviour_for(job) {
            Behaviour::Write(bytes) => write_output(job, bytes),
            Behaviour::BlockAfter(n) if call_index < n => write_output(job, 2048),
            Behaviour::Fail => Err(TranscodeError::Failed("scripted failure".into())),
            Behaviour::BlockUntilCancelled | Behaviour::BlockAfter(_) => {
                while !job.cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(TranscodeError::Cancelled)
            }
        }
    }
}

impl Transcoder for ScriptedTranscoder {
    fn transcode(&self, job: &TranscodeJob) -> Result<(), TranscodeError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(job.input.clone());
            calls.len() - 1
        };
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let result = self.perform(job, call_index);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn write_output(job: &TranscodeJob, bytes: usize) -> Result<(), TranscodeError> {
    std::fs::write(&job.output, vec![0u8; bytes]).map_err(|err| TranscodeError::Failed(err.to_string()))
}

/// Scratch folders for one test run.
pub struct Workspace {
    pub temp: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("create tempdir");
        let input = temp.path().join("input");
        let output = temp.path().join("output");
        std::fs::create_dir_all(&input).expect("create input dir");
        Self {
            temp,
            input,
            output,
        }
    }

    /// Write input videos of the given sizes.
    pub fn with_videos(self, files: &[(&str, usize)]) -> Self {
        for (name, size) in files {
            std::fs::write(self.input.join(name), vec![1u8; *size]).expect("write input video");
        }
        self
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.temp.path().join("state").join("checkpoint.json")
    }

    /// Fast-polling settings with checkpoints inside the workspace.
    pub fn settings(&self, workers: u32) -> BatchSettings {
        BatchSettings {
            max_workers: workers,
            poll_interval_ms: 10,
            progress_interval_ms: 20,
            checkpoint_path: Some(self.checkpoint_path()),
            ..BatchSettings::default()
        }
    }

    pub fn engine(&self, settings: BatchSettings, transcoder: Arc<ScriptedTranscoder>) -> Orchestrator {
        self.engine_with_probe(settings, transcoder, Box::new(FixedProbe::idle()))
    }

    pub fn engine_with_probe(
        &self,
        settings: BatchSettings,
        transcoder: Arc<ScriptedTranscoder>,
        probe: Box<dyn ResourceProbe>,
    ) -> Orchestrator {
        let transcoder: Arc<dyn Transcoder> = transcoder;
        Orchestrator::new(settings, transcoder)
            .with_resource_probe(probe)
            .with_checkpoint_store(Some(CheckpointStore::new(self.checkpoint_path())))
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}
