//! Library exports for the batch engine, its CLI, benchmarks and tests.
/// Application directory helpers.
pub mod app_dirs;
/// Batch processing engine: queue, workers, retries, progress and checkpoints.
pub mod batch;
/// Persisted engine settings.
pub mod config;
/// Tracing subscriber setup.
pub mod logging;
