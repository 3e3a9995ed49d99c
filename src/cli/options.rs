use std::path::PathBuf;

use vidbatch::batch::{QueueOrder, TaskConfig};
use vidbatch::config::BatchSettings;

#[derive(Clone, Debug, Default)]
pub(super) struct CliOptions {
    pub(super) input_dir: Option<PathBuf>,
    pub(super) output_dir: Option<PathBuf>,
    pub(super) command: Option<String>,
    pub(super) task_config: TaskConfig,
    pub(super) settings_path: Option<PathBuf>,
    pub(super) workers: Option<u32>,
    pub(super) memory_limit_gb: Option<f64>,
    pub(super) fifo: bool,
    pub(super) priority_by_size: bool,
    pub(super) max_retries: Option<u32>,
    pub(super) timeout_secs: Option<u64>,
    pub(super) checkpoint: Option<PathBuf>,
    pub(super) report: Option<PathBuf>,
    pub(super) resume: bool,
    pub(super) check_resources: bool,
    pub(super) log_file: bool,
}

impl CliOptions {
    /// Fold command-line overrides into loaded settings.
    pub(super) fn apply_to(&self, settings: &mut BatchSettings) {
        if let Some(workers) = self.workers {
            settings.max_workers = workers;
        }
        if let Some(limit) = self.memory_limit_gb {
            settings.memory_limit_gb = limit;
        }
        if self.fifo {
            settings.queue_order = QueueOrder::Fifo;
        }
        if let Some(retries) = self.max_retries {
            settings.max_retries = retries;
        }
        if let Some(timeout) = self.timeout_secs {
            settings.task_timeout_secs = timeout;
        }
        if let Some(path) = &self.checkpoint {
            settings.checkpoint_path = Some(path.clone());
        }
    }
}

/// Parse arguments; `Ok(None)` means help was printed.
pub(super) fn parse_args(args: Vec<String>) -> Result<Option<CliOptions>, String> {
    let mut options = CliOptions {
        priority_by_size: true,
        log_file: true,
        ..CliOptions::default()
    };
    let mut idx = 0usize;
    while idx < args.len() {
        if !apply_arg(&mut options, &args, &mut idx)? {
            println!("{}", help_text());
            return Ok(None);
        }
        idx += 1;
    }
    validate(&options)?;
    Ok(Some(options))
}

/// Returns false when help was requested.
fn apply_arg(options: &mut CliOptions, args: &[String], idx: &mut usize) -> Result<bool, String> {
    let flag = args.get(*idx).map(String::as_str).unwrap_or_default();
    if flag == "-h" || flag == "--help" {
        return Ok(false);
    }
    if apply_toggle(options, flag) || apply_value(options, args, idx, flag)? {
        return Ok(true);
    }
    if flag.starts_with('-') {
        return Err(format!("Unknown argument: {flag}\n\n{}", help_text()));
    }
    if options.input_dir.is_none() {
        options.input_dir = Some(PathBuf::from(flag));
    } else if options.output_dir.is_none() {
        options.output_dir = Some(PathBuf::from(flag));
    } else {
        return Err(format!("Unexpected argument: {flag}\n\n{}", help_text()));
    }
    Ok(true)
}

fn apply_toggle(options: &mut CliOptions, flag: &str) -> bool {
    match flag {
        "--fifo" => options.fifo = true,
        "--no-size-priority" => options.priority_by_size = false,
        "--resume" => options.resume = true,
        "--check-resources" => options.check_resources = true,
        "--no-log-file" => options.log_file = false,
        _ => return false,
    }
    true
}

fn apply_value(
    options: &mut CliOptions,
    args: &[String],
    idx: &mut usize,
    flag: &str,
) -> Result<bool, String> {
    match flag {
        "--command" => options.command = Some(value_after(args, idx, flag)?.to_string()),
        "--config" => {
            let (key, value) = parse_config_entry(value_after(args, idx, flag)?)?;
            options.task_config.insert(key, value);
        }
        "--settings" => options.settings_path = Some(PathBuf::from(value_after(args, idx, flag)?)),
        "--workers" => options.workers = Some(parse_number(args, idx, flag)?),
        "--memory-limit-gb" => options.memory_limit_gb = Some(parse_number(args, idx, flag)?),
        "--max-retries" => options.max_retries = Some(parse_number(args, idx, flag)?),
        "--timeout-secs" => options.timeout_secs = Some(parse_number(args, idx, flag)?),
        "--checkpoint" => options.checkpoint = Some(PathBuf::from(value_after(args, idx, flag)?)),
        "--report" => options.report = Some(PathBuf::from(value_after(args, idx, flag)?)),
        _ => return Ok(false),
    }
    Ok(true)
}

fn validate(options: &CliOptions) -> Result<(), String> {
    if options.check_resources {
        return Ok(());
    }
    if options.command.is_none() {
        return Err(format!("--command is required\n\n{}", help_text()));
    }
    if !options.resume && (options.input_dir.is_none() || options.output_dir.is_none()) {
        return Err(format!("Input and output folders are required\n\n{}", help_text()));
    }
    Ok(())
}

/// `key=value`, where the value is JSON when it parses as JSON and a string otherwise.
fn parse_config_entry(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Invalid --config entry (expected key=value): {raw}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Invalid --config entry (empty key): {raw}"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_number<T: std::str::FromStr>(args: &[String], idx: &mut usize, flag: &str) -> Result<T, String> {
    let value = value_after(args, idx, flag)?;
    value
        .parse::<T>()
        .map_err(|_| format!("Invalid {flag} value: {value}"))
}

fn value_after<'a>(args: &'a [String], idx: &mut usize, flag: &str) -> Result<&'a str, String> {
    *idx += 1;
    let value = args.get(*idx).ok_or_else(|| format!("{flag} requires a value"))?;
    Ok(value.as_str())
}

fn help_text() -> &'static str {
    "Usage: vidbatch <input_dir> <output_dir> --command \"<program> [args]\" [options]\n\n\
The command is run once per video; {input} and {output} are replaced with the\n\
task paths and --config entries are exported as JSON in VIDBATCH_TASK_CONFIG.\n\n\
Options:\n\
  --command <cmdline>         Transcode command template (required)\n\
  --config <key=value>        Per-task config entry, repeatable (JSON or string value)\n\
  --settings <path>           Settings TOML (default: vidbatch.toml in the app directory)\n\
  --workers <n>               Worker threads (default: auto)\n\
  --memory-limit-gb <gb>      Refuse new attempts above this used memory (default: 8)\n\
  --fifo                      Dispatch in insertion order instead of by priority\n\
  --no-size-priority          Do not rank the folder's videos by size\n\
  --max-retries <n>           Retries per task after the first attempt (default: 3)\n\
  --timeout-secs <n>          Per-attempt deadline, 0 for none (default: 0)\n\
  --checkpoint <path>         Checkpoint file (default: app checkpoints directory)\n\
  --resume                    Requeue pending tasks from the checkpoint instead of scanning\n\
  --report <path>             Report path (default: batch_report_<timestamp>.json)\n\
  --check-resources           Print a resource sample and exit\n\
  --no-log-file               Log to stdout only\n\
  -h, --help                  Show this help\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_positionals_and_overrides() {
        let options = parse_args(args(&[
            "in",
            "out",
            "--command",
            "ffmpeg -i {input} {output}",
            "--workers",
            "3",
            "--fifo",
            "--config",
            "subtitle_size=24",
            "--config",
            "source_language=vi",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(options.input_dir, Some(PathBuf::from("in")));
        assert_eq!(options.output_dir, Some(PathBuf::from("out")));
        assert_eq!(options.task_config["subtitle_size"], serde_json::json!(24));
        assert_eq!(options.task_config["source_language"], serde_json::json!("vi"));

        let mut settings = BatchSettings::default();
        options.apply_to(&mut settings);
        assert_eq!(settings.max_workers, 3);
        assert_eq!(settings.queue_order, QueueOrder::Fifo);
    }

    #[test]
    fn command_is_required_for_a_run() {
        let err = parse_args(args(&["in", "out"])).unwrap_err();
        assert!(err.starts_with("--command is required"));
        assert!(parse_args(args(&["--check-resources"])).unwrap().is_some());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_args(args(&["--workers", "many"])).is_err());
        assert!(parse_args(args(&["--config", "novalue"])).is_err());
        assert!(parse_args(args(&["--bogus"])).is_err());
        assert!(parse_args(args(&["--workers"])).is_err());
    }

    #[test]
    fn help_short_circuits() {
        assert!(parse_args(args(&["--help", "--bogus"])).unwrap().is_none());
    }
}
