use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One source file that needs to end up as one destination file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionJob {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    /// Path below the source root, used for reporting
    pub relative_path: PathBuf,
    pub bitrate: String,
}

impl ConversionJob {
    /// Create a job for a file found under `source_root`
    pub fn new(
        source_root: &Path,
        dest_root: &Path,
        relative_path: PathBuf,
        bitrate: &str,
        target_extension: &str,
    ) -> Self {
        Self {
            source_path: source_root.join(&relative_path),
            dest_path: map_destination(dest_root, &relative_path, target_extension),
            relative_path,
            bitrate: bitrate.to_string(),
        }
    }

    /// Whether the destination already exists and is at least as new as the source
    pub fn is_up_to_date(&self) -> bool {
        is_up_to_date(&self.source_path, &self.dest_path)
    }
}

/// Rebase a source-relative path onto `dest_root` and swap its extension.
///
/// Intermediate directories and the file stem are kept verbatim.
pub fn map_destination(dest_root: &Path, relative_path: &Path, target_extension: &str) -> PathBuf {
    dest_root.join(relative_path.with_extension(target_extension))
}

/// mtime comparison shared by transcoding and companion copies.
/// Missing or unreadable metadata on either side means "not up to date".
pub fn is_up_to_date(source: &Path, dest: &Path) -> bool {
    let modified = |path: &Path| fs::metadata(path).and_then(|m| m.modified()).ok();

    match (modified(source), modified(dest)) {
        (Some(source_mtime), Some(dest_mtime)) => source_mtime <= dest_mtime,
        _ => false,
    }
}

/// Outcome of a job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Success,
    Skipped,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Success => "SUCCESS",
            JobStatus::Skipped => "SKIPPED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub job: ConversionJob,
    pub status: JobStatus,
    pub error_detail: Option<String>,
    pub duration_ms: u64,
}

impl JobResult {
    pub fn success(job: ConversionJob, elapsed: Duration) -> Self {
        Self::new(job, JobStatus::Success, None, elapsed)
    }

    pub fn skipped(job: ConversionJob) -> Self {
        Self::new(job, JobStatus::Skipped, None, Duration::ZERO)
    }

    pub fn failed(job: ConversionJob, detail: impl Into<String>, elapsed: Duration) -> Self {
        Self::new(job, JobStatus::Failed, Some(detail.into()), elapsed)
    }

    fn new(
        job: ConversionJob,
        status: JobStatus,
        error_detail: Option<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            job,
            status,
            error_detail,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
