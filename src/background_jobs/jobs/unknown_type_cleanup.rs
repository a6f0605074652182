//! Removes dumps whose type was dropped from the configuration.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use std::time::Duration;
use tracing::info;

use super::report_to_result;

pub struct UnknownTypeCleanupJob {
    interval: Duration,
}

impl UnknownTypeCleanupJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl BackgroundJob for UnknownTypeCleanupJob {
    fn id(&self) -> &'static str {
        "unknown_type_cleanup"
    }

    fn name(&self) -> &'static str {
        "Unknown Type Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete dumps whose type is no longer configured"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let report = report_to_result(ctx.maintenance.delete_unknown_types(false))?;
        if !report.removed.is_empty() {
            info!("Deleted {} dumps of unknown types", report.removed.len());
        }
        Ok(())
    }
}
