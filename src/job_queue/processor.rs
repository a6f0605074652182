//! Pool of workers draining the dump job queue.
//!
//! Each worker runs one job at a time on the blocking thread pool. Failed
//! jobs are pushed back after a backoff when their retry policy allows it.
//! On shutdown the workers stop taking exports but still relay the status
//! updates that are ready, so a finished export is not left in progress.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::models::DumpJob;
use super::queue::{JobQueue, JobReceiver, QueuedJob};
use super::retry_policy::RetryPolicy;
use crate::server::metrics;

/// Executes dump jobs. Called from a blocking context.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &DumpJob) -> anyhow::Result<()>;

    /// How a failed job of this kind is retried.
    fn retry_policy(&self, job: &DumpJob) -> RetryPolicy;
}

pub struct JobProcessor {
    handler: Arc<dyn JobHandler>,
    queue: JobQueue,
    receiver: Mutex<JobReceiver>,
    workers: usize,
}

/// Running workers of a [`JobProcessor`].
pub struct JobProcessorHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl JobProcessorHandle {
    /// Wait for every worker to stop. Workers finish their current job first.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Job worker task failed: {}", e);
            }
        }
    }
}

impl JobProcessor {
    pub fn new(
        handler: Arc<dyn JobHandler>,
        queue: JobQueue,
        receiver: JobReceiver,
        workers: usize,
    ) -> Self {
        Self {
            handler,
            queue,
            receiver: Mutex::new(receiver),
            workers: workers.max(1),
        }
    }

    /// Spawn the workers. They stop taking jobs once `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> JobProcessorHandle {
        info!("Starting {} dump job workers", self.workers);
        let processor = Arc::new(self);
        let tasks = (0..processor.workers)
            .map(|worker_id| {
                let processor = processor.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { processor.worker_loop(worker_id, shutdown).await })
            })
            .collect();
        JobProcessorHandle { tasks }
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
        debug!("Job worker {} started", worker_id);
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                next = async { self.receiver.lock().await.recv().await } => Some(next),
            };
            match next {
                Some(Some(queued)) => self.process(queued).await,
                Some(None) => break,
                None => {
                    self.drain_status_updates().await;
                    break;
                }
            }
        }
        debug!("Job worker {} stopped", worker_id);
    }

    /// Relay every status update already queued. Exports found along the way
    /// stay in the store for the next start.
    async fn drain_status_updates(&self) {
        loop {
            let next = self.receiver.lock().await.try_recv();
            match next {
                Some(queued) if matches!(queued.job, DumpJob::StatusUpdate(_)) => {
                    self.process(queued).await
                }
                Some(queued) => debug!(
                    "Leaving {} job for {} to the next start",
                    queued.job.kind(),
                    queued.job.filename()
                ),
                None => break,
            }
        }
    }

    async fn process(&self, queued: QueuedJob) {
        if !self.queue.claim(&queued) {
            warn!(
                "Skipping {} job for {}: no longer pending",
                queued.job.kind(),
                queued.job.filename()
            );
            return;
        }
        let kind = queued.job.kind();
        let handler = self.handler.clone();
        let job = queued.job.clone();
        let result = tokio::task::spawn_blocking(move || handler.handle(&job)).await;

        let error = match result {
            Ok(Ok(())) => {
                metrics::record_job_execution(kind, "success");
                self.queue.finish(&queued);
                return;
            }
            Ok(Err(e)) => {
                metrics::record_job_execution(kind, "failed");
                e.to_string()
            }
            Err(join_error) => {
                metrics::record_job_execution(kind, "panicked");
                join_error.to_string()
            }
        };

        let policy = self.handler.retry_policy(&queued.job);
        if !policy.should_retry(queued.attempt) {
            error!(
                "{} job for {} failed after {} attempts: {}",
                kind,
                queued.job.filename(),
                queued.attempt + 1,
                error
            );
            self.queue.finish(&queued);
            return;
        }

        let delay = policy.backoff(queued.attempt);
        warn!(
            "{} job for {} failed (attempt {}), retrying in {:?}: {}",
            kind,
            queued.job.filename(),
            queued.attempt + 1,
            delay,
            error
        );
        let next = self.queue.reschedule(&queued, queued.attempt + 1);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.requeue(next) {
                error!("Failed to requeue job: {}", e);
            }
        });
    }
}
