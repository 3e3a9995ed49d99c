//! Folder scanning that turns a directory of videos into task descriptors.

use std::path::{Path, PathBuf};

use tracing::info;

use super::error::BatchError;
use super::task::{TaskConfig, TaskDescriptor};

const OUTPUT_SUFFIX: &str = "_processed";

/// A file picked up by the scan, before it becomes a task.
#[derive(Debug, Clone)]
struct FoundFile {
    input: PathBuf,
    output: PathBuf,
    size: u64,
}

/// Scan `input_dir` (non-recursively) and build one task per matching file.
///
/// With `priority_by_size` the files are ranked by ascending size and the
/// rank becomes the priority; otherwise every task gets priority 0. Nothing
/// is returned unless the whole scan succeeds. `output_dir` is created when
/// missing.
pub fn scan_folder(
    input_dir: &Path,
    output_dir: &Path,
    config: &TaskConfig,
    extensions: &[String],
    priority_by_size: bool,
) -> Result<Vec<TaskDescriptor>, BatchError> {
    if !input_dir.is_dir() {
        return Err(BatchError::InputDirMissing {
            path: input_dir.to_path_buf(),
        });
    }
    let mut found = collect_files(input_dir, output_dir, extensions)?;
    std::fs::create_dir_all(output_dir).map_err(|source| BatchError::CreateOutputDir {
        path: output_dir.to_path_buf(),
        source,
    })?;

    if priority_by_size {
        found.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.input.cmp(&b.input)));
    } else {
        found.sort_by(|a, b| a.input.cmp(&b.input));
    }
    let total_bytes: u64 = found.iter().map(|file| file.size).sum();
    info!(
        "Found {} video(s) in {} ({:.2}GB)",
        found.len(),
        input_dir.display(),
        total_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    );

    Ok(found
        .into_iter()
        .enumerate()
        .map(|(rank, file)| {
            let priority = if priority_by_size { rank as i64 } else { 0 };
            TaskDescriptor::new(file.input, file.output, config.clone(), priority)
                .with_file_size(file.size)
        })
        .collect())
}

fn collect_files(
    input_dir: &Path,
    output_dir: &Path,
    extensions: &[String],
) -> Result<Vec<FoundFile>, BatchError> {
    let read_err = |source| BatchError::ReadInputDir {
        path: input_dir.to_path_buf(),
        source,
    };
    let mut found = Vec::new();
    for entry in std::fs::read_dir(input_dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let meta = entry.metadata().map_err(read_err)?;
        if !meta.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_lowercase();
        let Some((stem, ext)) = split_extension(&file_name) else {
            continue;
        };
        if !extension_matches(ext, extensions) {
            continue;
        }
        found.push(FoundFile {
            input: entry.path(),
            output: output_dir.join(format!("{stem}{OUTPUT_SUFFIX}{ext}")),
            size: meta.len(),
        });
    }
    Ok(found)
}

/// Split a lowercase file name into stem and dotted extension (`clip`, `.mp4`).
fn split_extension(file_name: &str) -> Option<(&str, &str)> {
    let dot = file_name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some(file_name.split_at(dot))
}

fn extension_matches(ext: &str, extensions: &[String]) -> bool {
    extensions.iter().any(|allowed| {
        let allowed = allowed.trim();
        let allowed = allowed.strip_prefix('.').unwrap_or(allowed);
        ext[1..].eq_ignore_ascii_case(allowed)
    })
}
