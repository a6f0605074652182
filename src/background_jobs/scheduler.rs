use super::context::JobContext;
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::server::metrics;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay before retrying a job that found the maintenance lock taken.
const BUSY_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Upper bound on how long the loop sleeps between checks.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// How a single job execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Success,
    Busy,
    Failed,
    Cancelled,
    Panic,
}

impl RunOutcome {
    fn label(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Busy => "busy",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Panic => "panic",
        }
    }
}

#[derive(Default)]
struct SharedJobState {
    running_jobs: HashSet<String>,
    last_outcomes: HashMap<String, RunOutcome>,
}

/// Runs registered background jobs on their schedules.
pub struct JobScheduler {
    jobs: HashMap<String, Arc<dyn BackgroundJob>>,

    /// Shared with the spawned job tasks
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Currently running jobs with their task handles.
    running_handles: HashMap<String, JoinHandle<RunOutcome>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Next due time of every job with an interval.
    next_runs: HashMap<String, DateTime<Utc>>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(shutdown_token: CancellationToken, job_context: JobContext) -> Self {
        Self {
            jobs: HashMap::new(),
            shared_state: Arc::new(RwLock::new(SharedJobState::default())),
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            next_runs: HashMap::new(),
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    ///
    /// Interval jobs first run one interval after registration.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job {} ({}): {}", job.name(), job_id, job.description());
        if let Some(interval) = job.schedule().interval() {
            self.next_runs.insert(job_id.clone(), after(interval));
        }
        self.jobs.insert(job_id, job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub async fn is_job_running(&self, job_id: &str) -> bool {
        self.shared_state.read().await.running_jobs.contains(job_id)
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        info!("Starting job scheduler with {} registered jobs", self.job_count());

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn time_until_next_scheduled_job(&self) -> Duration {
        let state = self.shared_state.read().await;
        let now = Utc::now();
        let mut min_duration = MAX_SLEEP;
        for (job_id, next_run) in &self.next_runs {
            if state.running_jobs.contains(job_id) {
                continue;
            }
            let duration = (*next_run - now).to_std().unwrap_or(Duration::ZERO);
            if duration < min_duration {
                min_duration = duration;
            }
        }
        min_duration
    }

    /// Run all jobs that are due for scheduled execution.
    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let due: Vec<String> = {
            let state = self.shared_state.read().await;
            self.next_runs
                .iter()
                .filter(|(job_id, next_run)| {
                    **next_run <= now && !state.running_jobs.contains(job_id.as_str())
                })
                .map(|(job_id, _)| job_id.clone())
                .collect()
        };

        for job_id in due {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    /// Trigger all jobs that listen for a specific hook event.
    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let mut jobs_to_trigger: Vec<String> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.schedule().listens_to(event))
            .map(|(job_id, _)| job_id.clone())
            .collect();
        jobs_to_trigger.sort();

        for job_id in jobs_to_trigger {
            if self.is_job_running(&job_id).await {
                debug!("Skipping hook trigger for already running job: {}", job_id);
                continue;
            }
            let trigger = format!("hook:{}", event);
            self.spawn_job(&job_id, &trigger).await;
        }
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let Some(job) = self.jobs.get(job_id).cloned() else {
            error!("Attempted to spawn unknown job: {}", job_id);
            return;
        };

        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

        self.shared_state
            .write()
            .await
            .running_jobs
            .insert(job_id.to_string());

        // Keep the loop from re-spawning the job while it runs
        if let Some(interval) = job.schedule().interval() {
            self.next_runs.insert(job_id.to_string(), after(interval));
        }

        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let outcome = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    RunOutcome::Success
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    RunOutcome::Cancelled
                }
                Ok(Err(JobError::AlreadyRunning)) => {
                    warn!(
                        "Job {} found another maintenance task running, retrying in {:?}",
                        job_id_owned, BUSY_RETRY_DELAY
                    );
                    RunOutcome::Busy
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    RunOutcome::Failed
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    RunOutcome::Panic
                }
            };

            metrics::record_background_job_execution(&job_id_owned, outcome.label(), elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            let mut state = shared_state.write().await;
            state.running_jobs.remove(&job_id_owned);
            state.last_outcomes.insert(job_id_owned, outcome);
            outcome
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Reap finished job tasks and set their next run.
    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            let Some(handle) = self.running_handles.remove(&job_id) else {
                continue;
            };
            self.job_cancel_tokens.remove(&job_id);
            let outcome = handle.await.unwrap_or(RunOutcome::Panic);

            let Some(job) = self.jobs.get(&job_id) else {
                continue;
            };
            if outcome == RunOutcome::Busy {
                self.next_runs.insert(job_id, after(BUSY_RETRY_DELAY));
            } else if let Some(interval) = job.schedule().interval() {
                self.next_runs.insert(job_id, after(interval));
            }
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        for (job_id, token) in &self.job_cancel_tokens {
            let cancellable = self
                .jobs
                .get(job_id)
                .map(|job| job.shutdown_behavior() == ShutdownBehavior::Cancellable)
                .unwrap_or(true);
            if cancellable {
                debug!("Cancelling job: {}", job_id);
                token.cancel();
            }
        }

        for (job_id, handle) in self.running_handles.drain() {
            let waits = self
                .jobs
                .get(&job_id)
                .map(|job| job.shutdown_behavior() == ShutdownBehavior::WaitForCompletion)
                .unwrap_or(false);
            if waits {
                info!("Waiting for job {} to complete...", job_id);
            }
            let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default()
}
