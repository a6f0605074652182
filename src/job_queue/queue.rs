use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::models::DumpJob;
use super::store::JobStore;
use crate::server::metrics;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is closed")]
    Closed,
    #[error("Job store error: {0}")]
    Store(String),
}

/// Anything dump jobs can be pushed to.
pub trait JobSink: Send + Sync {
    fn push(&self, job: DumpJob) -> Result<(), QueueError>;
}

/// A job plus the number of attempts already made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job: DumpJob,
    pub attempt: u32,
    /// Row of the job in the store, when the queue has one.
    pub id: Option<i64>,
}

/// Sending half of the job queue. Cheap to clone, usable from blocking
/// threads.
///
/// With a [`JobStore`] every job is persisted before it is handed to the
/// workers and stays there until it finishes, which makes delivery
/// at-least-once across restarts. Without one, jobs only live in memory.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    depth: Arc<AtomicUsize>,
    store: Option<Arc<dyn JobStore>>,
}

pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<QueuedJob>,
    depth: Arc<AtomicUsize>,
}

impl JobQueue {
    pub fn new() -> (JobQueue, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            JobQueue {
                tx,
                depth: depth.clone(),
                store: None,
            },
            JobReceiver { rx, depth },
        )
    }

    /// A queue persisted in `store`. Jobs left unfinished by a previous run
    /// are queued again, oldest first.
    pub fn with_store(store: Arc<dyn JobStore>) -> anyhow::Result<(JobQueue, JobReceiver)> {
        let (mut queue, receiver) = Self::new();
        let recovered = store.recover()?;
        if !recovered.is_empty() {
            info!("Recovered {} unfinished dump jobs", recovered.len());
        }
        for stored in recovered {
            queue.send(QueuedJob {
                job: stored.job,
                attempt: stored.attempt,
                id: Some(stored.id),
            })?;
        }
        queue.store = Some(store);
        Ok((queue, receiver))
    }

    pub fn push_attempt(&self, job: DumpJob, attempt: u32) -> Result<(), QueueError> {
        let id = match &self.store {
            Some(store) => Some(
                store
                    .enqueue(&job, attempt)
                    .map_err(|e| QueueError::Store(format!("{:#}", e)))?,
            ),
            None => None,
        };
        self.send(QueuedJob { job, attempt, id })
    }

    /// Record that a failed job gets attempt number `attempt`. The job stays
    /// persisted until [`JobQueue::requeue`] hands it back.
    pub fn reschedule(&self, queued: &QueuedJob, attempt: u32) -> QueuedJob {
        if let (Some(store), Some(id)) = (&self.store, queued.id) {
            if let Err(e) = store.reschedule(id, attempt) {
                warn!("Failed to persist retry of job {}: {}", id, e);
            }
        }
        QueuedJob {
            attempt,
            ..queued.clone()
        }
    }

    /// Hand a rescheduled job back to the workers.
    pub fn requeue(&self, queued: QueuedJob) -> Result<(), QueueError> {
        self.send(queued)
    }

    /// Take a job for processing. False when the store says it is no longer
    /// pending, in which case it must be skipped.
    pub fn claim(&self, queued: &QueuedJob) -> bool {
        let (Some(store), Some(id)) = (&self.store, queued.id) else {
            return true;
        };
        match store.claim(id) {
            Ok(claimed) => claimed,
            Err(e) => {
                // Running it anyway keeps delivery at-least-once
                warn!("Failed to claim job {}: {}", id, e);
                true
            }
        }
    }

    /// Drop a job that succeeded or ran out of attempts.
    pub fn finish(&self, queued: &QueuedJob) {
        if let (Some(store), Some(id)) = (&self.store, queued.id) {
            if let Err(e) = store.complete(id) {
                error!("Failed to remove finished job {}: {}", id, e);
            }
        }
    }

    fn send(&self, queued: QueuedJob) -> Result<(), QueueError> {
        // Counted before sending so the receiver never decrements below zero
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(queued).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        metrics::set_job_queue_depth(depth);
        Ok(())
    }

    /// Jobs pushed but not yet picked up.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl JobSink for JobQueue {
    fn push(&self, job: DumpJob) -> Result<(), QueueError> {
        tracing::debug!("Queueing {} job for {}", job.kind(), job.filename());
        self.push_attempt(job, 0)
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<QueuedJob> {
        let job = self.rx.recv().await?;
        self.picked_up();
        Some(job)
    }

    pub fn try_recv(&mut self) -> Option<QueuedJob> {
        let job = self.rx.try_recv().ok()?;
        self.picked_up();
        Some(job)
    }

    fn picked_up(&self) {
        let depth = self
            .depth
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        metrics::set_job_queue_depth(depth);
    }
}
