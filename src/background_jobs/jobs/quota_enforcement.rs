//! Quota enforcement background job.
//!
//! Deletes the oldest dumps of every type holding more than its configured
//! limit.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use std::time::Duration;
use tracing::info;

use super::report_to_result;

pub struct QuotaEnforcementJob {
    interval: Duration,
}

impl QuotaEnforcementJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl BackgroundJob for QuotaEnforcementJob {
    fn id(&self) -> &'static str {
        "quota_enforcement"
    }

    fn name(&self) -> &'static str {
        "Quota Enforcement"
    }

    fn description(&self) -> &'static str {
        "Delete the oldest dumps of types over their limit"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Deletes are blob-then-row per dump, stopping midway is safe
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = report_to_result(ctx.maintenance.enforce_quota(false))?;
        if report.removed.is_empty() {
            info!("All dump types are within their limits");
        } else {
            info!("Deleted {} dumps over quota", report.removed.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use crate::chunked_storage::ChunkedStorage;
    use crate::config::{DumpProfile, DumpSettings};
    use crate::dump_registry::{DumpRecord, DumpRegistry, SqliteDumpRegistry};
    use crate::maintenance::{Maintenance, MaintenanceLock};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn context(lock_dir: &TempDir) -> (JobContext, Arc<SqliteDumpRegistry>) {
        let mut profile = DumpProfile::shell("xml", "true", &[]);
        profile.limit = 1;
        let settings = DumpSettings::default().with_profile(profile);
        let registry = Arc::new(SqliteDumpRegistry::in_memory().unwrap());
        let storage = Arc::new(ChunkedStorage::new(Arc::new(MemoryBlobStore::new())));
        let maintenance = Arc::new(Maintenance::new(
            Arc::new(settings),
            registry.clone(),
            storage,
            lock_dir.path(),
        ));
        (
            JobContext::new(CancellationToken::new(), maintenance),
            registry,
        )
    }

    #[test]
    fn test_job_metadata() {
        let job = QuotaEnforcementJob::new(Duration::from_secs(3600));
        assert_eq!(job.id(), "quota_enforcement");
        assert_eq!(job.schedule().interval(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_execute_trims_to_limit() {
        let lock_dir = TempDir::new().unwrap();
        let (ctx, registry) = context(&lock_dir);
        registry.insert(&DumpRecord::new_queued("a.xml", "xml", 1)).unwrap();
        registry.insert(&DumpRecord::new_queued("b.xml", "xml", 2)).unwrap();

        QuotaEnforcementJob::new(Duration::from_secs(60))
            .execute(&ctx)
            .unwrap();

        assert_eq!(registry.all_filenames().unwrap(), vec!["b.xml"]);
    }

    #[test]
    fn test_execute_reports_busy_lock() {
        let lock_dir = TempDir::new().unwrap();
        let (ctx, _registry) = context(&lock_dir);
        let _held = MaintenanceLock::acquire(lock_dir.path(), "cli").unwrap();

        let result = QuotaEnforcementJob::new(Duration::from_secs(60)).execute(&ctx);
        assert!(matches!(result, Err(JobError::AlreadyRunning)));
    }

    #[test]
    fn test_execute_cancelled() {
        let lock_dir = TempDir::new().unwrap();
        let (ctx, _registry) = context(&lock_dir);
        ctx.cancellation_token.cancel();

        let result = QuotaEnforcementJob::new(Duration::from_secs(60)).execute(&ctx);
        assert!(matches!(result, Err(JobError::Cancelled)));
    }
}
