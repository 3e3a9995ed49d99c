mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use support::harness::{Behaviour, ScriptedTranscoder, Workspace};
use vidbatch::batch::{
    BatchError, ProgressCallback, ProgressSnapshot, QueueOrder, TaskConfig, TaskDescriptor,
};

#[test]
fn smallest_file_runs_first_with_one_worker() {
    let workspace = Workspace::new().with_videos(&[("a.mp4", 100), ("b.mp4", 50), ("c.mp4", 200)]);
    let transcoder = ScriptedTranscoder::new(Behaviour::Write(2048));
    let engine = workspace.engine(workspace.settings(1), transcoder.clone());
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), true)
        .unwrap();

    let summary = engine.start(None).unwrap();

    assert_eq!(transcoder.call_names(), vec!["b.mp4", "a.mp4", "c.mp4"]);
    assert_eq!(summary.stats.completed, 3);
    assert_eq!(summary.stats.processed_bytes, 350);
    assert!(workspace.output.join("b_processed.mp4").is_file());
}

#[test]
fn equal_priorities_fall_back_to_size_then_insertion_order() {
    let workspace = Workspace::new().with_videos(&[("big.mp4", 300), ("small.mp4", 10), ("twin.mp4", 10)]);
    let transcoder = ScriptedTranscoder::new(Behaviour::Write(2048));
    let engine = workspace.engine(workspace.settings(1), transcoder.clone());
    for name in ["big.mp4", "twin.mp4", "small.mp4"] {
        engine
            .add_task(
                workspace.input.join(name),
                workspace.output.join(name),
                TaskConfig::new(),
                0,
            )
            .unwrap();
    }
    std::fs::create_dir_all(&workspace.output).unwrap();

    engine.start(None).unwrap();

    assert_eq!(transcoder.call_names(), vec!["twin.mp4", "small.mp4", "big.mp4"]);
}

#[test]
fn fifo_order_ignores_priority() {
    let workspace = Workspace::new().with_videos(&[("first.mp4", 500), ("second.mp4", 5)]);
    let transcoder = ScriptedTranscoder::new(Behaviour::Write(2048));
    let mut settings = workspace.settings(1);
    settings.queue_order = QueueOrder::Fifo;
    let engine = workspace.engine(settings, transcoder.clone());
    std::fs::create_dir_all(&workspace.output).unwrap();
    engine
        .add_task(workspace.input.join("first.mp4"), workspace.output.join("1.mp4"), TaskConfig::new(), 9)
        .unwrap();
    engine
        .add_task(workspace.input.join("second.mp4"), workspace.output.join("2.mp4"), TaskConfig::new(), 0)
        .unwrap();

    engine.start(None).unwrap();

    assert_eq!(transcoder.call_names(), vec!["first.mp4", "second.mp4"]);
}

#[test]
fn run_reaches_quiescence_with_every_task_accounted_for() {
    let videos: Vec<(String, usize)> = (0..12)
        .map(|i| {
            let name = if i % 4 == 0 { format!("bad_{i}.mp4") } else { format!("good_{i}.mp4") };
            (name, 100 + i)
        })
        .collect();
    let refs: Vec<(&str, usize)> = videos.iter().map(|(name, size)| (name.as_str(), *size)).collect();
    let workspace = Workspace::new().with_videos(&refs);
    let transcoder = ScriptedTranscoder::failing_on("bad_", Duration::from_millis(2));
    let mut settings = workspace.settings(3);
    settings.max_retries = 1;
    let engine = workspace.engine(settings, transcoder);
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), true)
        .unwrap();

    let summary = engine.start(None).unwrap();
    let stats = summary.stats;

    assert_eq!(stats.total, 12);
    assert_eq!(stats.completed + stats.failed, stats.total);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.processing, 0);
    assert!(stats.ended_at.is_some());
    assert!(summary.total_duration_seconds.is_some());
    assert_eq!(engine.completed_tasks().len(), 9);
    assert_eq!(engine.failed_tasks().len(), 3);
    assert!(!engine.is_running());
}

#[test]
fn workers_never_exceed_the_configured_limit() {
    let names: Vec<String> = (0..10).map(|i| format!("clip_{i:02}.mp4")).collect();
    let refs: Vec<(&str, usize)> = names.iter().map(|name| (name.as_str(), 64)).collect();
    let workspace = Workspace::new().with_videos(&refs);
    let transcoder = ScriptedTranscoder::with_delay(Behaviour::Write(2048), Duration::from_millis(30));
    let engine = workspace.engine(workspace.settings(2), transcoder.clone());
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), false)
        .unwrap();

    let observed = Arc::new(Mutex::new(Vec::<ProgressSnapshot>::new()));
    let sink = Arc::clone(&observed);
    let callback: ProgressCallback = Arc::new(move |progress: &ProgressSnapshot| {
        sink.lock().unwrap().push(progress.clone());
    });
    engine.start(Some(callback)).unwrap();

    assert_eq!(transcoder.peak_concurrency(), 2);
    let observed = observed.lock().unwrap();
    assert!(observed.iter().all(|progress| progress.processing <= 2));
}

#[test]
fn progress_is_monotone_and_ends_at_one_hundred() {
    let names: Vec<String> = (0..6).map(|i| format!("v{i}.mkv")).collect();
    let refs: Vec<(&str, usize)> = names.iter().map(|name| (name.as_str(), 10)).collect();
    let workspace = Workspace::new().with_videos(&refs);
    let transcoder = ScriptedTranscoder::with_delay(Behaviour::Write(2048), Duration::from_millis(15));
    let engine = workspace.engine(workspace.settings(2), transcoder);
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), true)
        .unwrap();

    let percentages = Arc::new(Mutex::new(Vec::<f64>::new()));
    let sink = Arc::clone(&percentages);
    let callback: ProgressCallback = Arc::new(move |progress: &ProgressSnapshot| {
        sink.lock().unwrap().push(progress.percentage);
    });
    engine.start(Some(callback)).unwrap();

    let percentages = percentages.lock().unwrap();
    assert!(!percentages.is_empty());
    assert!(percentages.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(*percentages.last().unwrap(), 100.0);
    assert_eq!(engine.progress().percentage, 100.0);
    assert!(engine.progress().resources.is_some());
}

#[test]
fn start_with_nothing_queued_fails_without_side_effects() {
    let workspace = Workspace::new();
    let engine = workspace.engine(workspace.settings(1), ScriptedTranscoder::new(Behaviour::Write(2048)));
    let err = engine.start(None).unwrap_err();
    assert!(matches!(err, BatchError::EmptyQueue));
    let stats = engine.statistics().stats;
    assert!(stats.started_at.is_none());
    assert!(!engine.is_running());
}

#[test]
fn second_start_during_a_run_is_refused() {
    let workspace = Workspace::new().with_videos(&[("slow.mp4", 10)]);
    let transcoder = ScriptedTranscoder::with_delay(Behaviour::Write(2048), Duration::from_millis(300));
    let engine = Arc::new(workspace.engine(workspace.settings(1), transcoder.clone()));
    engine
        .add_folder(&workspace.input, &workspace.output, &TaskConfig::new(), true)
        .unwrap();

    let runner = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.start(None))
    };
    assert!(support::harness::wait_until(Duration::from_secs(5), || transcoder.call_count() == 1));
    assert!(matches!(engine.start(None), Err(BatchError::AlreadyRunning)));
    let snapshot = engine.snapshot();
    assert!(matches!(
        engine.restore_checkpoint(snapshot, vidbatch::batch::ResumePolicy::ReportOnly),
        Err(BatchError::AlreadyRunning)
    ));

    let summary = runner.join().unwrap().unwrap();
    assert_eq!(summary.stats.completed, 1);
}

#[test]
fn tasks_added_after_a_run_start_a_new_run_with_the_same_start_time() {
    let workspace = Workspace::new().with_videos(&[("one.mp4", 10), ("two.mp4", 10)]);
    let transcoder = ScriptedTranscoder::new(Behaviour::Write(2048));
    let engine = workspace.engine(workspace.settings(1), transcoder.clone());
    std::fs::create_dir_all(&workspace.output).unwrap();
    engine.enqueue(TaskDescriptor::new(
        workspace.input.join("one.mp4"),
        workspace.output.join("one.mp4"),
        TaskConfig::new(),
        0,
    ));
    let first = engine.start(None).unwrap();
    engine.enqueue(TaskDescriptor::new(
        workspace.input.join("two.mp4"),
        workspace.output.join("two.mp4"),
        TaskConfig::new(),
        0,
    ));
    let second = engine.start(None).unwrap();

    assert_eq!(first.stats.started_at, second.stats.started_at);
    assert_eq!(second.stats.total, 2);
    assert_eq!(second.stats.completed, 2);
    assert_eq!(transcoder.call_count(), 2);
}
