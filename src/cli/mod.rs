mod options;

use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};
use vidbatch::batch::{
    CommandTranscoder, Orchestrator, ProgressCallback, ProgressSnapshot, ResourceProbe,
    ResumePolicy, SystemProbe,
};
use vidbatch::config::{self, BatchSettings};
use vidbatch::logging::{self, LogTarget};

use options::CliOptions;

pub(crate) fn run(args: Vec<String>) -> Result<(), String> {
    let Some(options) = options::parse_args(args)? else {
        return Ok(());
    };
    let target = if options.log_file {
        LogTarget::StdoutAndFile
    } else {
        LogTarget::StdoutOnly
    };
    if let Err(err) = logging::init(target) {
        eprintln!("Logging disabled: {err}");
    }
    let settings = load_settings(&options)?;

    if options.check_resources {
        print_resources(&settings);
        return Ok(());
    }
    let command = options.command.as_deref().unwrap_or_default();
    let transcoder = CommandTranscoder::from_command_line(command)
        .ok_or_else(|| "--command must name a program".to_string())?;
    let engine = Orchestrator::new(settings, Arc::new(transcoder));

    queue_work(&engine, &options)?;
    let callback: ProgressCallback = Arc::new(print_progress);
    let summary = engine
        .start(Some(callback))
        .map_err(|err| err.to_string())?;

    let report = options.report.clone().unwrap_or_else(default_report_path);
    engine
        .export_report(&report)
        .map_err(|err| err.to_string())?;
    println!(
        "Done: {} completed, {} failed of {} (report: {})",
        summary.stats.completed,
        summary.stats.failed,
        summary.stats.total,
        report.display()
    );
    Ok(())
}

fn load_settings(options: &CliOptions) -> Result<BatchSettings, String> {
    let mut settings = match &options.settings_path {
        Some(path) => config::load_from(path).map_err(|err| err.to_string())?,
        None => config::load_or_default().unwrap_or_else(|err| {
            warn!("Using default settings: {err}");
            BatchSettings::default()
        }),
    };
    options.apply_to(&mut settings);
    Ok(settings)
}

fn queue_work(engine: &Orchestrator, options: &CliOptions) -> Result<(), String> {
    if options.resume {
        let snapshot = engine.load_checkpoint().map_err(|err| err.to_string())?;
        if let Some(snapshot) = snapshot {
            let pending = snapshot.pending_tasks.len();
            engine
                .restore_checkpoint(snapshot, ResumePolicy::RequeuePending)
                .map_err(|err| err.to_string())?;
            println!("Resumed {pending} pending task(s) from checkpoint");
            return Ok(());
        }
        info!("No checkpoint to resume from; scanning input folder");
    }
    let (Some(input), Some(output)) = (&options.input_dir, &options.output_dir) else {
        return Err("Nothing to resume and no input/output folders given".to_string());
    };
    println!("Input: {}", input.display());
    println!("Output: {}", output.display());
    let ids = engine
        .add_folder(input, output, &options.task_config, options.priority_by_size)
        .map_err(|err| err.to_string())?;
    println!("Queued {} video(s)", ids.len());
    Ok(())
}

fn print_progress(progress: &ProgressSnapshot) {
    let ram = progress
        .resources
        .map(|sample| format!("{:.1}GB", sample.memory_used_gb))
        .unwrap_or_else(|| "?".to_string());
    println!(
        "Progress: {:.1}% | completed {} | processing {} | failed {} | RAM {} | ETA {:.0}s",
        progress.percentage,
        progress.completed,
        progress.processing,
        progress.failed,
        ram,
        progress.estimated_remaining_seconds
    );
}

fn print_resources(settings: &BatchSettings) {
    let sample = SystemProbe::from_settings(settings).sample();
    println!("RAM available: {:.1}GB", sample.memory_available_gb);
    println!("RAM used: {:.1}GB", sample.memory_used_gb);
    println!("CPU: {:.1}%", sample.cpu_percent);
    println!("Disk free: {:.1}GB", sample.disk_free_gb);
}

fn default_report_path() -> PathBuf {
    const STAMP_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
        format_description!("[year][month][day]_[hour][minute][second]");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let stamp = now
        .format(STAMP_FORMAT)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    PathBuf::from(format!("batch_report_{stamp}.json"))
}
