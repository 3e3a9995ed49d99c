//! Host resource sampling and the per-attempt admission gate.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::warn;

use crate::config::BatchSettings;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Point-in-time reading of host resources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_used_gb: f64,
    pub memory_available_gb: f64,
    pub disk_free_gb: f64,
}

/// Source of resource readings.
pub trait ResourceProbe: Send + Sync {
    /// Take a reading; may block briefly while CPU usage is measured.
    fn sample(&self) -> ResourceSample;
}

/// Thresholds an attempt must stay within to be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdmissionLimits {
    pub memory_limit_gb: f64,
    pub cpu_limit_percent: f32,
    pub min_disk_free_gb: f64,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            memory_limit_gb: 8.0,
            cpu_limit_percent: 90.0,
            min_disk_free_gb: 1.0,
        }
    }
}

impl AdmissionLimits {
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            memory_limit_gb: settings.memory_limit_gb,
            cpu_limit_percent: settings.cpu_limit_percent,
            min_disk_free_gb: settings.min_disk_free_gb,
        }
    }

    pub fn admits(&self, sample: &ResourceSample) -> bool {
        sample.memory_used_gb < self.memory_limit_gb
            && sample.cpu_percent < self.cpu_limit_percent
            && sample.disk_free_gb > self.min_disk_free_gb
    }
}

/// Samples resources and decides whether a new attempt may start.
pub struct ResourceMonitor {
    probe: Box<dyn ResourceProbe>,
    limits: AdmissionLimits,
}

impl ResourceMonitor {
    pub fn new(probe: Box<dyn ResourceProbe>, limits: AdmissionLimits) -> Self {
        Self { probe, limits }
    }

    pub fn limits(&self) -> AdmissionLimits {
        self.limits
    }

    pub fn sample(&self) -> ResourceSample {
        self.probe.sample()
    }

    pub fn admits(&self, sample: &ResourceSample) -> bool {
        self.limits.admits(sample)
    }

    /// Sample and judge in one step.
    pub fn can_admit(&self) -> bool {
        let sample = self.sample();
        self.admits(&sample)
    }
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Probe backed by `sysinfo`.
pub struct SystemProbe {
    system: Mutex<System>,
    cpu_window: Duration,
    disk_path: PathBuf,
}

impl SystemProbe {
    pub fn new(cpu_window: Duration, disk_path: Option<PathBuf>) -> Self {
        let disk_path = disk_path
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let disk_path = disk_path.canonicalize().unwrap_or(disk_path);
        Self {
            system: Mutex::new(System::new()),
            cpu_window: cpu_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
            disk_path,
        }
    }

    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self::new(settings.cpu_sample_window(), settings.disk_probe_path.clone())
    }

    fn lock_system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|poisoned| {
            warn!("Resource probe lock poisoned; recovering.");
            poisoned.into_inner()
        })
    }

    fn disk_free_gb(&self) -> f64 {
        let disks = Disks::new_with_refreshed_list();
        let mounts = disks
            .iter()
            .map(|disk| (disk.mount_point(), disk.available_space()));
        match free_space_for_path(&self.disk_path, mounts) {
            Some(bytes) => bytes as f64 / BYTES_PER_GB,
            None => {
                warn!(
                    "No disk found for {}; reporting zero free space",
                    self.disk_path.display()
                );
                0.0
            }
        }
    }
}

impl ResourceProbe for SystemProbe {
    fn sample(&self) -> ResourceSample {
        self.lock_system().refresh_cpu_usage();
        // Lock released for the window.
        std::thread::sleep(self.cpu_window);
        let (cpu_percent, total, available) = {
            let mut system = self.lock_system();
            system.refresh_cpu_usage();
            system.refresh_memory();
            (
                system.global_cpu_usage(),
                system.total_memory(),
                system.available_memory(),
            )
        };
        ResourceSample {
            cpu_percent,
            memory_used_gb: total.saturating_sub(available) as f64 / BYTES_PER_GB,
            memory_available_gb: available as f64 / BYTES_PER_GB,
            disk_free_gb: self.disk_free_gb(),
        }
    }
}

/// Free bytes on the mount with the longest prefix match for `path`.
fn free_space_for_path<'a>(
    path: &Path,
    mounts: impl Iterator<Item = (&'a Path, u64)>,
) -> Option<u64> {
    mounts
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
        .map(|(_, free)| free)
}

/// Probe returning the same reading every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub ResourceSample);

impl FixedProbe {
    /// A comfortably idle machine.
    pub fn idle() -> Self {
        Self(ResourceSample {
            cpu_percent: 5.0,
            memory_used_gb: 1.0,
            memory_available_gb: 15.0,
            disk_free_gb: 500.0,
        })
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> ResourceSample {
        self.0
    }
}
