use anyhow::{Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::commands::extras::ExtrasSummary;
use crate::job::{JobResult, JobStatus};
use crate::pool::JobEvent;

const PROGRESS_BAR_TEMPLATE: &str =
    "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {percent}% {wide_msg}";
const PROGRESS_BAR_CHARS: &str = "=>-";

/// Per-status totals for one run
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct JobCounts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }

    fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Success => self.succeeded += 1,
            JobStatus::Skipped => self.skipped += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    /// `"2 succeeded, 0 skipped, 0 failed"`, or the conditional wording in dry-run
    pub fn summary_line(&self, dry_run: bool) -> String {
        if dry_run {
            format!(
                "{} would convert, {} would skip, {} failed",
                self.succeeded, self.skipped, self.failed
            )
        } else {
            format!(
                "{} succeeded, {} skipped, {} failed",
                self.succeeded, self.skipped, self.failed
            )
        }
    }
}

/// Everything printed at the end of a run, also emitted as JSON with `--json`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub interrupted: bool,
    pub jobs: JobCounts,
    pub extras: ExtrasSummary,
    pub log_file: Option<PathBuf>,
    pub error_log_file: Option<PathBuf>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.interrupted || self.jobs.failed > 0 || self.extras.failed > 0
    }

    pub fn render(&self) -> String {
        let mut lines = vec![self.jobs.summary_line(self.dry_run)];
        if self.extras.total() > 0 {
            lines.push(self.extras.summary_line(self.dry_run));
        }
        if let Some(log_file) = &self.log_file {
            lines.push(format!("Log: {}", log_file.display()));
        }
        if let Some(error_log_file) = &self.error_log_file {
            if self.jobs.failed > 0 || self.extras.failed > 0 {
                lines.push(format!("Errors: {}", error_log_file.display()));
            }
        }
        if self.interrupted {
            lines.push("Interrupted before all files were processed".to_string());
        }
        lines.join("\n")
    }
}

fn status_label(status: JobStatus, dry_run: bool) -> &'static str {
    match (status, dry_run) {
        (JobStatus::Success, true) => "WOULD CONVERT",
        (JobStatus::Skipped, true) => "WOULD SKIP",
        (JobStatus::Success, false) => "SUCCESS",
        (JobStatus::Skipped, false) => "SKIPPED",
        (JobStatus::Failed, _) => "FAILED",
    }
}

/// Append-only log pair: every job in the main file, failures also in the error file
pub struct RunLog {
    path: PathBuf,
    error_path: PathBuf,
    writer: BufWriter<File>,
    error_writer: BufWriter<File>,
}

impl RunLog {
    /// Open (or create) both files. The error log sits next to the main log as
    /// `<stem>.errors.log`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {:?}", parent))?;
        }

        let error_path = path.with_extension("errors.log");
        let open = |p: &Path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .with_context(|| format!("Failed to open log file {:?}", p))
        };

        Ok(Self {
            writer: BufWriter::new(open(path)?),
            error_writer: BufWriter::new(open(&error_path)?),
            path: path.to_path_buf(),
            error_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    /// One line per entry: `timestamp<TAB>STATUS<TAB>path[<TAB>detail]`
    pub fn append(&mut self, label: &str, path: &Path, detail: Option<&str>) -> Result<()> {
        let mut line = format!(
            "{}\t{}\t{}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            label,
            path.display()
        );
        if let Some(detail) = detail {
            line.push('\t');
            line.push_str(&detail.replace('\n', " | "));
        }

        writeln!(self.writer, "{line}")?;
        if detail.is_some() {
            writeln!(self.error_writer, "{line}")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.error_writer.flush()?;
        Ok(())
    }
}

/// Single consumer of `JobEvent`s. Owns the progress bar and the log files, so
/// log lines are never interleaved. Entries are written in completion order.
pub struct Reporter {
    dry_run: bool,
    verbose: bool,
    progress: ProgressBar,
    log: Option<RunLog>,
    counts: JobCounts,
}

impl Reporter {
    pub fn new(dry_run: bool, verbose: bool, log: Option<RunLog>) -> Self {
        let progress = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_BAR_TEMPLATE) {
            progress.set_style(style.progress_chars(PROGRESS_BAR_CHARS));
        }

        Self {
            dry_run,
            verbose,
            progress,
            log,
            counts: JobCounts::default(),
        }
    }

    /// Replace the terminal bar, e.g. with `ProgressBar::hidden()`
    pub fn with_progress_bar(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress_bar(&self) -> &ProgressBar {
        &self.progress
    }

    pub fn counts(&self) -> JobCounts {
        self.counts
    }

    pub fn record(&mut self, event: JobEvent) -> Result<()> {
        match event {
            JobEvent::Discovered => self.progress.inc_length(1),
            JobEvent::Started(job) => {
                self.progress
                    .set_message(job.relative_path.display().to_string());
            }
            JobEvent::Finished(result) => self.finish_job(result)?,
        }
        Ok(())
    }

    fn finish_job(&mut self, result: JobResult) -> Result<()> {
        self.counts.add(result.status);
        self.progress.inc(1);

        let label = status_label(result.status, self.dry_run);
        let path = &result.job.relative_path;

        if let Some(log) = self.log.as_mut() {
            log.append(label, path, result.error_detail.as_deref())?;
        }

        match (&result.status, &result.error_detail) {
            (JobStatus::Failed, detail) => {
                let detail = detail.as_deref().unwrap_or("unknown error");
                self.progress
                    .suspend(|| eprintln!("❌ {} {}: {}", label, path.display(), detail));
            }
            // stdout carries only the summary, which may be JSON
            _ if self.verbose => {
                self.progress.suspend(|| {
                    eprintln!(
                        "{} {} ({} ms)",
                        label,
                        path.display(),
                        result.duration_ms
                    )
                });
            }
            _ => {}
        }

        debug!("{} {:?}", label, path);
        Ok(())
    }

    /// Record an arbitrary log line (companion copies share the run log)
    pub fn log_line(&mut self, label: &str, path: &Path, detail: Option<&str>) -> Result<()> {
        if let Some(log) = self.log.as_mut() {
            log.append(label, path, detail)?;
        }
        if detail.is_some() {
            self.progress.suspend(|| {
                eprintln!("❌ {} {}: {}", label, path.display(), detail.unwrap_or_default())
            });
        } else if self.verbose {
            self.progress
                .suspend(|| eprintln!("{} {}", label, path.display()));
        }
        Ok(())
    }

    /// Clear the bar and flush the logs. Returns the final counts and log paths.
    pub fn finish(mut self) -> Result<(JobCounts, Option<PathBuf>, Option<PathBuf>)> {
        self.progress.finish_and_clear();
        let (log_file, error_log_file) = match self.log.as_mut() {
            Some(log) => {
                log.flush()?;
                (Some(log.path().to_path_buf()), Some(log.error_path().to_path_buf()))
            }
            None => (None, None),
        };
        Ok((self.counts, log_file, error_log_file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ConversionJob;
    use std::time::Duration;
    use tempfile::TempDir;

    fn job(name: &str) -> ConversionJob {
        ConversionJob::new(
            Path::new("/src"),
            Path::new("/dest"),
            PathBuf::from(name),
            "192k",
            "opus",
        )
    }

    fn quiet_reporter(dry_run: bool, log: Option<RunLog>) -> Reporter {
        Reporter::new(dry_run, false, log).with_progress_bar(ProgressBar::hidden())
    }

    #[test]
    fn test_summary_lines() {
        let counts = JobCounts {
            succeeded: 2,
            skipped: 0,
            failed: 0,
        };
        assert_eq!(counts.summary_line(false), "2 succeeded, 0 skipped, 0 failed");
        assert_eq!(counts.summary_line(true), "2 would convert, 0 would skip, 0 failed");
    }

    #[test]
    fn test_reporter_counts_results() {
        let mut reporter = quiet_reporter(false, None);
        for _ in 0..3 {
            reporter.record(JobEvent::Discovered).unwrap();
        }
        reporter
            .record(JobEvent::Finished(JobResult::success(job("a.flac"), Duration::from_millis(5))))
            .unwrap();
        reporter
            .record(JobEvent::Finished(JobResult::skipped(job("b.flac"))))
            .unwrap();
        reporter
            .record(JobEvent::Finished(JobResult::failed(job("c.flac"), "boom", Duration::ZERO)))
            .unwrap();

        assert_eq!(reporter.progress_bar().length(), Some(3));
        assert_eq!(reporter.progress_bar().position(), 3);

        let (counts, log_file, _) = reporter.finish().unwrap();
        assert_eq!(
            counts,
            JobCounts {
                succeeded: 1,
                skipped: 1,
                failed: 1
            }
        );
        assert!(log_file.is_none());
    }

    #[test]
    fn test_log_file_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log = RunLog::open(&temp_dir.path().join("logs/run.log")).unwrap();
        let mut reporter = quiet_reporter(false, Some(log));

        reporter
            .record(JobEvent::Finished(JobResult::success(job("sub/a b.flac"), Duration::ZERO)))
            .unwrap();
        reporter
            .record(JobEvent::Finished(JobResult::failed(
                job("c.flac"),
                "Encoder exited with code Some(1): line one\nline two",
                Duration::ZERO,
            )))
            .unwrap();
        let (_, log_file, error_log_file) = reporter.finish().unwrap();

        let log_file = log_file.unwrap();
        let error_log_file = error_log_file.unwrap();
        assert_eq!(error_log_file, temp_dir.path().join("logs/run.errors.log"));

        let content = fs::read_to_string(log_file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("\tSUCCESS\tsub/a b.flac"));
        assert!(lines[1].contains("\tFAILED\tc.flac\t"));
        assert!(lines[1].ends_with("line one | line two"));

        let errors = fs::read_to_string(error_log_file).unwrap();
        assert_eq!(errors.lines().count(), 1);
        assert!(errors.contains("c.flac"));
    }

    #[test]
    fn test_log_is_append_only() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run.log");

        for name in ["a.flac", "b.flac"] {
            let mut reporter = quiet_reporter(false, Some(RunLog::open(&path).unwrap()));
            reporter
                .record(JobEvent::Finished(JobResult::skipped(job(name))))
                .unwrap();
            reporter.finish().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_dry_run_labels() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dry.log");
        let mut reporter = quiet_reporter(true, Some(RunLog::open(&path).unwrap()));
        reporter
            .record(JobEvent::Finished(JobResult::success(job("a.flac"), Duration::ZERO)))
            .unwrap();
        reporter
            .record(JobEvent::Finished(JobResult::skipped(job("b.flac"))))
            .unwrap();
        reporter.finish().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\tWOULD CONVERT\ta.flac"));
        assert!(content.contains("\tWOULD SKIP\tb.flac"));
    }

    #[test]
    fn test_run_summary_failures() {
        let mut summary = RunSummary {
            dry_run: false,
            interrupted: false,
            jobs: JobCounts {
                succeeded: 2,
                skipped: 0,
                failed: 0,
            },
            extras: ExtrasSummary::default(),
            log_file: None,
            error_log_file: None,
        };
        assert!(!summary.has_failures());
        assert_eq!(summary.render(), "2 succeeded, 0 skipped, 0 failed");

        summary.extras.failed = 1;
        assert!(summary.has_failures());

        summary.extras.failed = 0;
        summary.interrupted = true;
        assert!(summary.has_failures());
    }
}
