//! Periodic progress callbacks from a dedicated thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

use crate::batch::stats::ProgressSnapshot;

/// Caller-supplied progress sink, invoked from the monitor thread.
pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

type SnapshotSource = Box<dyn Fn() -> ProgressSnapshot + Send>;

/// Condvar-backed stop signal so the monitor wakes immediately at run end.
struct StopSignal {
    stopped: Mutex<bool>,
    ready: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    fn notify(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped = true;
        self.ready.notify_all();
    }

    /// Wait up to `timeout`; true once stop has been signalled.
    fn wait_for(&self, timeout: Duration) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *stopped {
            return true;
        }
        let (stopped, _timeout) = self
            .ready
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped
    }
}

/// Thread that pushes progress to a callback on a fixed interval, plus one final push.
pub(crate) struct ProgressMonitor {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    pub(crate) fn spawn(interval: Duration, callback: ProgressCallback, snapshot: SnapshotSource) -> Self {
        let signal = Arc::new(StopSignal::new());
        let thread_signal = Arc::clone(&signal);
        let spawned = std::thread::Builder::new()
            .name("vidbatch-progress".into())
            .spawn(move || {
                while !thread_signal.wait_for(interval) {
                    invoke(&callback, &snapshot());
                }
                invoke(&callback, &snapshot());
            });
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("Failed to spawn progress monitor: {err}");
                None
            }
        };
        Self { signal, handle }
    }

    /// Stop the monitor after its final callback.
    pub(crate) fn finish(mut self) {
        self.signal.notify();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Progress monitor thread panicked");
        }
    }
}

fn invoke(callback: &ProgressCallback, snapshot: &ProgressSnapshot) {
    if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
        warn!("Progress callback panicked; continuing");
    }
}
