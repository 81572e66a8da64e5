use std::path::Path;

use anyhow::{Context, Result};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

/// Size at which the log file is rotated.
pub const ROTATE_BYTES: u64 = 10 * 1024 * 1024;
/// Rotated logs kept, gzip-compressed; older ones are deleted.
pub const KEEP_ROTATED: usize = 10;

fn file_spec(path: &Path) -> FileSpec {
    let mut spec = FileSpec::default().suppress_timestamp();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        spec = spec.directory(dir);
    }
    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        spec = spec.basename(stem);
    }
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => spec.suffix(ext),
        None => spec.suffix("log"),
    }
}

/// Logs to `path`, honouring `RUST_LOG` and defaulting to `info`. The live file keeps its
/// name; rotated ones get a number and are compressed. Messages at `echo` and above are
/// also written to stderr. Keep the handle alive for as long as logging is needed.
pub fn start(path: &Path, echo: Duplicate) -> Result<LoggerHandle> {
    Logger::try_with_env_or_str("info")
        .context("Invalid log specification")?
        .log_to_file(file_spec(path))
        .append()
        .rotate(
            Criterion::Size(ROTATE_BYTES),
            Naming::NumbersDirect,
            Cleanup::KeepCompressedFiles(KEEP_ROTATED),
        )
        .format_for_files(flexi_logger::detailed_format)
        .duplicate_to_stderr(echo)
        .start()
        .with_context(|| format!("Failed to start logging to {}", path.display()))
}
