use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::encoder::{Encoder, JobRunner, ProcessEncoder};
use crate::job::{ConversionJob, JobResult};
use crate::pool::{JobEvent, Scheduler};
use crate::reporter::{Reporter, RunLog, RunSummary};
use crate::scanner::{Discovered, TreeScanner};

use super::extras::{ExtrasCopier, ExtrasSummary};

/// Jobs buffered between the scanner thread and the pool
const QUEUE_CAPACITY: usize = 64;

/// One full mirror run: scan, transcode, copy companion files, summarize
pub struct TranscodeCommand {
    config: RunConfig,
    encoder: Arc<dyn Encoder>,
}

impl TranscodeCommand {
    pub fn new(config: RunConfig) -> Self {
        let encoder = Arc::new(ProcessEncoder::new(config.encoder.clone()));
        Self { config, encoder }
    }

    /// Run with a different encoder, e.g. one that never spawns a process
    pub fn with_encoder(config: RunConfig, encoder: Arc<dyn Encoder>) -> Self {
        Self { config, encoder }
    }

    /// Where the log goes. Dry runs only log when asked to explicitly, so the
    /// destination stays untouched.
    fn log_path(&self) -> Option<PathBuf> {
        match (&self.config.log_file, self.config.dry_run) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => None,
            (None, false) => Some(
                self.config
                    .dest_root
                    .join(format!("opusify_{}.log", Local::now().timestamp())),
            ),
        }
    }

    fn log_header(&self) {
        let config = &self.config;
        info!("🎵 Transcoding started at {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        info!("Source Directory        : {:?}", config.source_root);
        info!("Destination Directory   : {:?}", config.dest_root);
        info!("Bitrate                 : {}", config.bitrate);
        info!("Parallel jobs           : {}", config.job_count);
        info!("Encoder                 : {}", self.encoder.name());
        info!("Verbose Mode            : {}", config.verbose);
        info!("Dry-run Mode            : {}", config.dry_run);
    }

    pub async fn execute(&self, cancel: CancellationToken) -> Result<RunSummary> {
        self.config.validate()?;

        // Fatal checks come before anything is written
        let scanner = TreeScanner::new(
            self.config.source_root.clone(),
            self.config.dest_root.clone(),
            &self.config.encoder.source_extension,
            self.config.dry_run,
        )?;

        if !self.config.dry_run {
            self.encoder.check_available()?;
        }

        self.log_header();

        let log = self.log_path().map(|path| RunLog::open(&path)).transpose()?;
        let mut reporter = Reporter::new(self.config.dry_run, self.config.verbose, log);
        reporter.progress_bar().enable_steady_tick(Duration::from_millis(250));

        let (job_tx, job_rx) = mpsc::channel::<ConversionJob>(QUEUE_CAPACITY);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<JobEvent>();

        let reporter_task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                reporter.record(event)?;
            }
            Ok::<Reporter, anyhow::Error>(reporter)
        });

        let producer = {
            let config = self.config.clone();
            let events = event_tx.clone();
            tokio::task::spawn_blocking(move || produce_jobs(scanner, &config, job_tx, events))
        };

        let runner = JobRunner::new(Arc::clone(&self.encoder), self.config.dry_run, cancel.clone());
        let scheduler = Scheduler::new(runner, self.config.job_count, cancel.clone());
        let stats = scheduler.run(job_rx, event_tx).await;

        let extras = producer.await.context("Scanner thread failed")?;
        let mut reporter = reporter_task
            .await
            .map_err(|e| anyhow!("Reporter task failed: {}", e))??;

        info!(
            "Dispatched {} jobs, peak concurrency {}",
            stats.dispatched(),
            stats.peak_active()
        );

        let extras_summary = if self.config.copy_extras && !cancel.is_cancelled() {
            ExtrasCopier::new(&self.config.source_root, &self.config.dest_root, self.config.dry_run)
                .copy_all(&extras, &cancel, &mut reporter)
                .await?
        } else {
            ExtrasSummary::default()
        };

        let (jobs, log_file, error_log_file) = reporter.finish()?;

        if cancel.is_cancelled() {
            warn!("🛑 Run interrupted by user");
        } else {
            info!("✅ All done!");
        }

        Ok(RunSummary {
            dry_run: self.config.dry_run,
            interrupted: cancel.is_cancelled(),
            jobs,
            extras: extras_summary,
            log_file,
            error_log_file,
        })
    }
}

/// Runs on a blocking thread: walks the tree, queues jobs in discovery order and
/// collects companion files for later. A second source mapping onto an already
/// claimed destination is reported as failed instead of being queued.
fn produce_jobs(
    scanner: TreeScanner,
    config: &RunConfig,
    jobs: mpsc::Sender<ConversionJob>,
    events: mpsc::UnboundedSender<JobEvent>,
) -> Vec<PathBuf> {
    let mut extras = Vec::new();
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut queued = 0usize;

    for discovered in scanner {
        match discovered {
            Discovered::Extra(relative) => extras.push(relative),
            Discovered::Source(relative) => {
                let job = ConversionJob::new(
                    &config.source_root,
                    &config.dest_root,
                    relative,
                    &config.bitrate,
                    &config.encoder.target_extension,
                );
                let _ = events.send(JobEvent::Discovered);

                if let Some(first) = claimed.get(&job.dest_path) {
                    let detail = format!(
                        "Destination {:?} is already produced from {:?}",
                        job.dest_path, first
                    );
                    warn!("⚠️ {}", detail);
                    let _ = events.send(JobEvent::Finished(JobResult::failed(
                        job,
                        detail,
                        Duration::ZERO,
                    )));
                    continue;
                }
                claimed.insert(job.dest_path.clone(), job.relative_path.clone());

                if jobs.blocking_send(job).is_err() {
                    // Pool stopped taking work (interrupted)
                    break;
                }
                queued += 1;
            }
        }
    }

    info!(
        "Found {} {} files and {} companion files",
        queued,
        config.encoder.source_extension,
        extras.len()
    );
    extras
}
