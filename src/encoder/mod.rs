use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EncoderSettings;
use crate::error::TranscodeError;
use crate::job::{ConversionJob, JobResult};

/// Something that can turn one input file into one output file at a bitrate.
///
/// The pool only ever talks to this trait, so tests can swap in an encoder that
/// never spawns a process.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Fail fast when the encoder cannot possibly run
    fn check_available(&self) -> Result<(), TranscodeError> {
        Ok(())
    }

    async fn encode(&self, input: &Path, output: &Path, bitrate: &str) -> Result<(), TranscodeError>;
}

/// Runs an external encoder binary:
/// `<binary> <flags...> --bitrate <bitrate> <input> <output>`
pub struct ProcessEncoder {
    settings: EncoderSettings,
}

impl ProcessEncoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }

    /// Locate the encoder binary in PATH
    pub fn locate(&self) -> Result<PathBuf, TranscodeError> {
        which::which(&self.settings.binary).map_err(|_| TranscodeError::EncoderNotFound {
            binary: self.settings.binary.clone(),
        })
    }

    fn build_command(&self, input: &Path, output: &Path, bitrate: &str) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        cmd.args(&self.settings.flags);
        cmd.args(["--bitrate", bitrate]);
        cmd.arg(input);
        cmd.arg(output);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        // A dropped wait (timeout, Ctrl-C) must not leave the encoder running
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Encoder for ProcessEncoder {
    fn name(&self) -> &str {
        &self.settings.binary
    }

    fn check_available(&self) -> Result<(), TranscodeError> {
        let path = self.locate()?;
        debug!("Using encoder at {:?}", path);
        Ok(())
    }

    async fn encode(&self, input: &Path, output: &Path, bitrate: &str) -> Result<(), TranscodeError> {
        let mut cmd = self.build_command(input, output, bitrate);
        debug!("Executing encoder command: {:?}", cmd);

        let child = cmd.spawn().map_err(|source| TranscodeError::Spawn {
            binary: self.settings.binary.clone(),
            source,
        })?;

        let output = match self.settings.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| TranscodeError::Timeout {
                    secs: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TranscodeError::EncodeFailure {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(())
    }
}

/// Turns a `ConversionJob` into a `JobResult`: freshness check, dry-run
/// synthesis, output directory, then the encoder itself.
#[derive(Clone)]
pub struct JobRunner {
    encoder: Arc<dyn Encoder>,
    dry_run: bool,
    cancel: CancellationToken,
}

impl JobRunner {
    pub fn new(encoder: Arc<dyn Encoder>, dry_run: bool, cancel: CancellationToken) -> Self {
        Self {
            encoder,
            dry_run,
            cancel,
        }
    }

    pub async fn process(&self, job: ConversionJob) -> JobResult {
        let started = Instant::now();

        if self.cancel.is_cancelled() {
            return JobResult::failed(job, TranscodeError::Interrupted.to_string(), Duration::ZERO);
        }

        if job.is_up_to_date() {
            debug!(
                "Skipping {:?} as {:?} is up-to-date",
                job.source_path, job.dest_path
            );
            return JobResult::skipped(job);
        }

        if self.dry_run {
            info!(
                "Dry-run: would transcode {:?} to {:?} at {}",
                job.source_path, job.dest_path, job.bitrate
            );
            return JobResult::success(job, Duration::ZERO);
        }

        if let Some(parent) = job.dest_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                let err = TranscodeError::write(parent, e);
                return JobResult::failed(job, err.to_string(), started.elapsed());
            }
        }

        let outcome = tokio::select! {
            result = self.encoder.encode(&job.source_path, &job.dest_path, &job.bitrate) => result,
            _ = self.cancel.cancelled() => Err(TranscodeError::Interrupted),
        };

        match outcome {
            Ok(()) => {
                let elapsed = started.elapsed();
                log_sizes(&job, elapsed).await;
                JobResult::success(job, elapsed)
            }
            Err(e) => {
                // A half-written output would look up-to-date on the next run
                let _ = tokio::fs::remove_file(&job.dest_path).await;
                debug!("{} failed on {:?}: {}", self.encoder.name(), job.source_path, e);
                JobResult::failed(job, e.to_string(), started.elapsed())
            }
        }
    }
}

async fn log_sizes(job: &ConversionJob, elapsed: Duration) {
    let size = |path: PathBuf| async move {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.len().to_string())
            .unwrap_or_else(|_| "N/A".to_string())
    };

    debug!(
        "Transcoded {:?}: source={} bytes, destination={} bytes, took {:.2}s",
        job.relative_path,
        size(job.source_path.clone()).await,
        size(job.dest_path.clone()).await,
        elapsed.as_secs_f64()
    );
}
