use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::encoder::JobRunner;
use crate::job::{ConversionJob, JobResult};

/// What the pool tells the reporter
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The scanner queued one more job
    Discovered,
    /// A job was handed to a worker
    Started(ConversionJob),
    Finished(JobResult),
}

/// Counters shared between the scheduler and its workers
#[derive(Debug, Default)]
pub struct PoolStats {
    pub dispatched: AtomicUsize,
    pub active: AtomicUsize,
    pub peak_active: AtomicUsize,
    pub completed: AtomicUsize,
}

impl PoolStats {
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Fixed-size worker pool draining the job queue.
///
/// A permit is taken before the next job is pulled, so jobs leave the queue in
/// discovery order and never more than `worker_count` run at once. Completion
/// order is whatever the encoders make it.
pub struct Scheduler {
    runner: JobRunner,
    worker_count: usize,
    cancel: CancellationToken,
    stats: Arc<PoolStats>,
}

impl Scheduler {
    pub fn new(runner: JobRunner, worker_count: usize, cancel: CancellationToken) -> Self {
        Self {
            runner,
            worker_count: worker_count.max(1),
            cancel,
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Dispatch every job from `jobs` and wait for all of them to finish.
    ///
    /// Returns once the queue is closed and drained, or once cancellation has
    /// been requested and the in-flight jobs have wound down.
    pub async fn run(
        &self,
        mut jobs: mpsc::Receiver<ConversionJob>,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Arc<PoolStats> {
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut in_flight = JoinSet::new();

        debug!("Worker pool started with {} workers", self.worker_count);

        loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Worker task failed: {}", e);
                }
            }

            self.stats.dispatched.fetch_add(1, Ordering::SeqCst);
            let _ = events.send(JobEvent::Started(job.clone()));

            let runner = self.runner.clone();
            let events = events.clone();
            let stats = Arc::clone(&self.stats);

            in_flight.spawn(async move {
                let active = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
                stats.peak_active.fetch_max(active, Ordering::SeqCst);

                let result = runner.process(job).await;

                stats.active.fetch_sub(1, Ordering::SeqCst);
                stats.completed.fetch_add(1, Ordering::SeqCst);
                drop(permit);
                let _ = events.send(JobEvent::Finished(result));
            });
        }

        if self.cancel.is_cancelled() {
            warn!(
                "🛑 Interrupted. Stopped dispatching, terminating {} running jobs.",
                in_flight.len()
            );
        }

        // Closing the queue lets the scanner thread stop early
        jobs.close();

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }

        self.stats()
    }
}
