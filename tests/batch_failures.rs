mod support;

use std::sync::Arc;
use std::time::Duration;

use support::harness::{Behaviour, ScriptedTranscoder, Workspace};
use vidbatch::batch::{FixedProbe, ResourceSample, TaskConfig, TaskDescriptor, TranscodeError, TranscodeJob};

#[test]
fn always_failing_task_is_attempted_once_plus_each_retry() {
    let workspace = Workspace::new().with_videos(&[("broken.mp4", 10)]);
    let transcoder = ScriptedTranscoder::new(Behaviour::Fail);
    let engine = workspace.engine(workspace.settings(1), transcoder.clone());
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), true)
        .unwrap();

    let summary = engine.start(None).unwrap();

    assert_eq!(transcoder.call_count(), 4);
    assert_eq!(summary.stats.failed, 1);
    assert_eq!(summary.stats.completed, 0);
    let failed = engine.failed_tasks();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 3);
    assert!(failed[0].output_path.is_none());
    assert!(failed[0].error.as_deref().unwrap().contains("scripted failure"));
}

#[test]
fn custom_retry_budget_is_respected() {
    let workspace = Workspace::new().with_videos(&[("x.mp4", 10)]);
    let transcoder = ScriptedTranscoder::new(Behaviour::Fail);
    let engine = workspace.engine(workspace.settings(1), transcoder.clone());
    std::fs::create_dir_all(&workspace.output).unwrap();
    engine.enqueue(
        TaskDescriptor::new(workspace.input.join("x.mp4"), workspace.output.join("x.mp4"), TaskConfig::new(), 0)
            .with_max_retries(1),
    );

    engine.start(None).unwrap();

    assert_eq!(transcoder.call_count(), 2);
    assert_eq!(engine.failed_tasks()[0].retry_count, 1);
}

#[test]
fn denied_admission_fails_every_task_without_calling_the_transcoder() {
    let workspace = Workspace::new().with_videos(&[("a.mp4", 10), ("b.mp4", 20)]);
    let transcoder = ScriptedTranscoder::new(Behaviour::Write(4096));
    let starved = FixedProbe(ResourceSample {
        cpu_percent: 10.0,
        memory_used_gb: 12.0,
        memory_available_gb: 0.5,
        disk_free_gb: 200.0,
    });
    let engine = workspace.engine_with_probe(workspace.settings(2), transcoder.clone(), Box::new(starved));
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), true)
        .unwrap();

    let summary = engine.start(None).unwrap();

    assert_eq!(summary.stats.completed, 0);
    assert_eq!(summary.stats.failed, 2);
    assert_eq!(transcoder.call_count(), 0);
    for result in engine.failed_tasks() {
        assert!(result.error.unwrap().starts_with("insufficient resources"));
        assert_eq!(result.retry_count, 3);
    }
}

#[test]
fn tiny_output_counts_as_failure() {
    let workspace = Workspace::new().with_videos(&[("short.mp4", 10)]);
    let transcoder = ScriptedTranscoder::new(Behaviour::Write(100));
    let mut settings = workspace.settings(1);
    settings.max_retries = 0;
    let engine = workspace.engine(settings, transcoder);
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), true)
        .unwrap();

    let summary = engine.start(None).unwrap();

    assert_eq!(summary.stats.failed, 1);
    let error = engine.failed_tasks()[0].error.clone().unwrap();
    assert!(error.contains("100 bytes"), "{error}");
}

#[test]
fn panicking_transcoder_does_not_take_down_the_run() {
    let workspace = Workspace::new().with_videos(&[("boom.mp4", 10), ("fine.mp4", 20)]);
    std::fs::create_dir_all(&workspace.output).unwrap();
    let transcoder: Arc<dyn vidbatch::batch::Transcoder> =
        Arc::new(|job: &TranscodeJob| -> Result<(), TranscodeError> {
            if job.input.ends_with("boom.mp4") {
                panic!("codec crashed");
            }
            std::fs::write(&job.output, vec![0u8; 2048]).map_err(|err| TranscodeError::Failed(err.to_string()))
        });
    let mut settings = workspace.settings(2);
    settings.max_retries = 0;
    let engine = vidbatch::batch::Orchestrator::new(settings, transcoder)
        .with_resource_probe(Box::new(FixedProbe::idle()))
        .with_checkpoint_store(None);
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), true)
        .unwrap();

    let summary = engine.start(None).unwrap();

    assert_eq!(summary.stats.completed, 1);
    assert_eq!(summary.stats.failed, 1);
    assert!(engine.failed_tasks()[0].error.as_deref().unwrap().contains("codec crashed"));
}

#[cfg(unix)]
#[test]
fn attempts_past_the_deadline_are_timeouts() {
    let workspace = Workspace::new().with_videos(&[("stuck.mp4", 10)]);
    std::fs::create_dir_all(&workspace.output).unwrap();
    let transcoder: Arc<dyn vidbatch::batch::Transcoder> =
        Arc::new(vidbatch::batch::CommandTranscoder::new("sleep", vec!["5".into()]));
    let mut settings = workspace.settings(1);
    settings.max_retries = 0;
    settings.task_timeout_secs = 1;
    let engine = vidbatch::batch::Orchestrator::new(settings, transcoder)
        .with_resource_probe(Box::new(FixedProbe::idle()))
        .with_checkpoint_store(None);
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), true)
        .unwrap();

    let started = std::time::Instant::now();
    let summary = engine.start(None).unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(summary.stats.failed, 1);
    assert!(engine.failed_tasks()[0].error.as_deref().unwrap().contains("timed out"));
}
